//! Error taxonomy for reconciliation.
//!
//! Definition and validation errors are raised before any remote call.
//! Apply and read errors are raised after remote calls and never undo the
//! bookkeeping those calls produced.

use std::collections::BTreeMap;
use std::time::Duration;

use grid_id::{ContractId, IdError, NodeId};
use thiserror::Error;

use crate::gateway::{GatewayError, LedgerError};

/// Bad desired-state input. Never touches remote state.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error(transparent)]
    InvalidName(#[from] IdError),

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{field} must be between {min} and {max}, got {actual}")]
    OutOfRange {
        field: String,
        min: u64,
        max: u64,
        actual: u64,
    },

    #[error("workload name '{name}' is used more than once")]
    DuplicateName { name: String },

    #[error("node {node} has no entry in nodes_ip_range")]
    MissingNodeRange { node: NodeId },

    #[error("ip range '{range}' for node {node} is not an IPv4 CIDR with room for hosts")]
    InvalidNodeRange { node: NodeId, range: String },

    #[error("ip range '{range}' for node {node} has no free address left")]
    NodeRangeExhausted { node: NodeId, range: String },

    #[error("cluster token must be a non-empty alphanumeric string")]
    InvalidToken,

    #[error("mycelium ip seed '{seed}' must be 6 hex encoded bytes")]
    InvalidMyceliumSeed { seed: String },

    #[error("updating {kind} resources is not allowed")]
    UpdateNotAllowed { kind: &'static str },

    #[error("failed to encode deployment: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Pre-flight failure. Never touches remote state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("node {node} is not reachable after {waited:?}: {reason}")]
    NodeUnreachable {
        node: NodeId,
        waited: Duration,
        reason: String,
    },

    #[error("node {node} has no usable public config: {reason}")]
    NoPublicConfig { node: NodeId, reason: String },

    #[error("account contains {balance}, minimum required is {minimum}")]
    InsufficientBalance { balance: u128, minimum: u128 },

    #[error("failed to read account balance: {0}")]
    Ledger(#[source] LedgerError),
}

/// The per-node action a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One failed node call.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub action: ActionKind,
    /// Contract the action targeted, if the node was already tracked.
    pub contract_id: Option<ContractId>,
    pub error: GatewayError,
}

/// Aggregate per-node apply failure.
///
/// The registry has already been updated for every node that succeeded.
#[derive(Debug, Clone, Error)]
#[error("failed to apply deployments on nodes {}: {}", node_list(.failures), describe(.failures))]
pub struct ApplyError {
    pub failures: BTreeMap<NodeId, NodeFailure>,
}

impl ApplyError {
    /// Nodes whose call failed, in ascending order.
    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.failures.keys().copied().collect()
    }
}

/// Failure reading remote state back.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    #[error("couldn't sync contracts: {0}")]
    Prune(#[source] LedgerError),

    #[error("couldn't get deployments from nodes {}: {}", node_list(.failures), describe_reads(.failures))]
    Fetch {
        failures: BTreeMap<NodeId, GatewayError>,
    },
}

/// Any reconciler failure.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Read(#[from] ReadError),
}

fn node_list<V>(failures: &BTreeMap<NodeId, V>) -> String {
    let nodes: Vec<String> = failures.keys().map(ToString::to_string).collect();
    format!("[{}]", nodes.join(", "))
}

fn describe(failures: &BTreeMap<NodeId, NodeFailure>) -> String {
    failures
        .iter()
        .map(|(node, f)| format!("node {} ({}): {}", node, f.action, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_reads(failures: &BTreeMap<NodeId, GatewayError>) -> String {
    failures
        .iter()
        .map(|(node, e)| format!("node {}: {}", node, e))
        .collect::<Vec<_>>()
        .join("; ")
}
