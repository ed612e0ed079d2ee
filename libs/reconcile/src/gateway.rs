//! Capability interfaces for remote nodes and the ledger.
//!
//! The reconciler never talks to a transport directly. Everything it needs
//! from the outside world goes through [`NodeGateway`] (per-node deployment
//! RPC) and [`Ledger`] (contracts, balances, groups).

use std::time::Duration;

use async_trait::async_trait;
use grid_id::{ContractId, GroupId, NodeId, TwinId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deployment::Deployment;

/// A failed call to a single node.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("node {node} did not answer within {timeout:?}")]
    Timeout { node: NodeId, timeout: Duration },

    #[error("deployment {contract_id} not found on node {node}")]
    NotFound {
        node: NodeId,
        contract_id: ContractId,
    },

    #[error("transport error talking to node {node}: {message}")]
    Transport { node: NodeId, message: String },

    #[error("node {node} rejected the request: {message}")]
    Rejected { node: NodeId, message: String },
}

impl GatewayError {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Timeout { node, .. }
            | Self::NotFound { node, .. }
            | Self::Transport { node, .. }
            | Self::Rejected { node, .. } => *node,
        }
    }
}

/// A failed ledger call.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Public network configuration advertised by a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    /// Public IPv4 in CIDR form, e.g. `185.206.122.33/24`.
    #[serde(default)]
    pub ipv4: String,
    #[serde(default)]
    pub ipv6: String,
    #[serde(default)]
    pub gateway: String,
    /// Domain served by the node when it acts as a gateway.
    #[serde(default)]
    pub domain: String,
}

impl PublicConfig {
    /// Returns true if the config carries a usable IPv4 address.
    pub fn has_ipv4(&self) -> bool {
        let addr = self.ipv4.split('/').next().unwrap_or_default();
        addr.parse::<std::net::Ipv4Addr>().is_ok()
    }
}

/// Validity of a contract on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    Valid,
    /// Expired, cancelled out-of-band, or never existed.
    Invalid,
}

/// Per-node deployment RPC.
///
/// Implementations must be safe for concurrent use by many resources.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Create (`existing == None`) or update a deployment.
    ///
    /// The deployment is versionless; the node assigns the version and
    /// returns the contract id the deployment lives under.
    async fn apply(
        &self,
        node: NodeId,
        existing: Option<ContractId>,
        deployment: &Deployment,
    ) -> Result<ContractId, GatewayError>;

    /// Delete the deployment and cancel its contract.
    async fn delete(&self, node: NodeId, contract_id: ContractId) -> Result<(), GatewayError>;

    /// Fetch a deployment's current content, including workload results.
    async fn get(&self, node: NodeId, contract_id: ContractId)
        -> Result<Deployment, GatewayError>;

    /// Single liveness probe. Retry policy belongs to the caller.
    async fn is_live(&self, node: NodeId) -> Result<bool, GatewayError>;

    /// The node's public config, or `None` if it has none configured.
    async fn public_config(&self, node: NodeId) -> Result<Option<PublicConfig>, GatewayError>;
}

/// Ledger and account operations.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn contract_state(&self, contract_id: ContractId) -> Result<ContractState, LedgerError>;

    /// Free balance of `identity`. Unknown accounts are `LedgerError::NotFound`.
    async fn account_balance(&self, identity: TwinId) -> Result<u128, LedgerError>;

    async fn create_group(&self, owner: TwinId) -> Result<GroupId, LedgerError>;

    async fn get_group(&self, group_id: GroupId) -> Result<(), LedgerError>;

    async fn delete_group(&self, owner: TwinId, group_id: GroupId) -> Result<(), LedgerError>;
}
