//! Per-node client pool.
//!
//! One client per node, created lazily on first use and reused by every
//! resource afterwards. [`PooledGateway`] puts the pool behind the
//! [`NodeGateway`] interface and bounds every call with the node call
//! timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use grid_id::{ContractId, NodeId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ReconcilerConfig;
use crate::deployment::Deployment;
use crate::gateway::{GatewayError, NodeGateway, PublicConfig};

/// Connection to a single node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn deploy(&self, deployment: &Deployment) -> Result<ContractId>;

    async fn update(&self, contract_id: ContractId, deployment: &Deployment) -> Result<ContractId>;

    async fn delete(&self, contract_id: ContractId) -> Result<()>;

    /// `None` if the node has no deployment under that contract.
    async fn get(&self, contract_id: ContractId) -> Result<Option<Deployment>>;

    async fn ping(&self) -> Result<bool>;

    async fn public_config(&self) -> Result<Option<PublicConfig>>;
}

/// Opens connections to nodes.
#[async_trait]
pub trait NodeClientFactory: Send + Sync {
    type Client: NodeClient;

    async fn connect(&self, node: NodeId) -> Result<Self::Client>;
}

/// Lazily populated map of node clients.
pub struct NodeClientPool<F: NodeClientFactory> {
    factory: F,
    clients: RwLock<HashMap<NodeId, Arc<F::Client>>>,
}

impl<F: NodeClientFactory> NodeClientPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for `node`, connecting on first use.
    pub async fn client(&self, node: NodeId) -> Result<Arc<F::Client>> {
        if let Some(client) = self.clients.read().await.get(&node) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        // Another caller may have connected while we waited for the lock.
        if let Some(client) = clients.get(&node) {
            return Ok(Arc::clone(client));
        }

        info!(node_id = %node, "Connecting to node");
        let client = Arc::new(self.factory.connect(node).await?);
        clients.insert(node, Arc::clone(&client));
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

/// [`NodeGateway`] backed by a [`NodeClientPool`].
pub struct PooledGateway<F: NodeClientFactory> {
    pool: NodeClientPool<F>,
    timeout: Duration,
}

impl<F: NodeClientFactory> PooledGateway<F> {
    pub fn new(factory: F, timeout: Duration) -> Self {
        Self {
            pool: NodeClientPool::new(factory),
            timeout,
        }
    }

    /// Gateway bounded by the configured node call timeout.
    pub fn from_config(factory: F, config: &ReconcilerConfig) -> Self {
        Self::new(factory, config.node_call_timeout)
    }

    pub fn pool(&self) -> &NodeClientPool<F> {
        &self.pool
    }

    /// Run one call against `node`'s client, bounded by the call timeout.
    async fn call<T, Fut, C>(&self, node: NodeId, call: C) -> Result<T, GatewayError>
    where
        C: FnOnce(Arc<F::Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempt = async {
            let client = self.pool.client(node).await?;
            call(client).await
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(GatewayError::Transport {
                node,
                message: format!("{e:#}"),
            }),
            Err(_) => Err(GatewayError::Timeout {
                node,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl<F: NodeClientFactory> NodeGateway for PooledGateway<F> {
    async fn apply(
        &self,
        node: NodeId,
        existing: Option<ContractId>,
        deployment: &Deployment,
    ) -> Result<ContractId, GatewayError> {
        debug!(node_id = %node, existing = ?existing, "Applying deployment");
        self.call(node, |client| async move {
            match existing {
                Some(contract_id) => client.update(contract_id, deployment).await,
                None => client.deploy(deployment).await,
            }
        })
        .await
    }

    async fn delete(&self, node: NodeId, contract_id: ContractId) -> Result<(), GatewayError> {
        self.call(node, |client| async move { client.delete(contract_id).await })
            .await
    }

    async fn get(&self, node: NodeId, contract_id: ContractId) -> Result<Deployment, GatewayError> {
        self.call(node, |client| async move { client.get(contract_id).await })
            .await?
            .ok_or(GatewayError::NotFound { node, contract_id })
    }

    async fn is_live(&self, node: NodeId) -> Result<bool, GatewayError> {
        self.call(node, |client| async move { client.ping().await })
            .await
    }

    async fn public_config(&self, node: NodeId) -> Result<Option<PublicConfig>, GatewayError> {
        self.call(node, |client| async move { client.public_config().await })
            .await
    }
}
