//! Pre-flight validation.
//!
//! Runs before any mutating call. Nothing here touches the contract
//! registry.

use std::sync::Arc;
use std::time::Duration;

use grid_id::{NodeId, TwinId};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LivenessConfig;
use crate::error::ValidationError;
use crate::gateway::{Ledger, NodeGateway};

/// Node pre-flight checks.
pub struct Validator<G> {
    gateway: Arc<G>,
    liveness: LivenessConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<G: NodeGateway> Validator<G> {
    pub fn new(gateway: Arc<G>, liveness: LivenessConfig) -> Self {
        Self {
            gateway,
            liveness,
            shutdown: None,
        }
    }

    /// Abort liveness probing once `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Check every node is live, and that `public_nodes` advertise a public
    /// IPv4.
    pub async fn validate(
        &self,
        nodes: &[NodeId],
        public_nodes: &[NodeId],
    ) -> Result<(), ValidationError> {
        for &node in nodes {
            self.wait_until_live(node).await?;
            if public_nodes.contains(&node) {
                self.check_public_config(node).await?;
            }
        }
        Ok(())
    }

    /// Poll a node until it answers, for at most the liveness window.
    pub async fn wait_until_live(&self, node: NodeId) -> Result<(), ValidationError> {
        let started = Instant::now();
        let deadline = started + self.liveness.window;
        let mut shutdown = self.shutdown.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let reason = match tokio::time::timeout(
                self.liveness.attempt_timeout,
                self.gateway.is_live(node),
            )
            .await
            {
                Ok(Ok(true)) => {
                    debug!(node_id = %node, attempts, "Node is live");
                    return Ok(());
                }
                Ok(Ok(false)) => "node reported not ready".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("probe timed out after {:?}", self.liveness.attempt_timeout),
            };

            let now = Instant::now();
            if now + self.liveness.interval >= deadline {
                warn!(node_id = %node, attempts, reason = %reason, "Node unreachable");
                return Err(ValidationError::NodeUnreachable {
                    node,
                    waited: now - started,
                    reason,
                });
            }

            debug!(node_id = %node, attempts, reason = %reason, "Node not live yet, retrying");
            if sleep_or_shutdown(self.liveness.interval, shutdown.as_mut()).await {
                return Err(ValidationError::NodeUnreachable {
                    node,
                    waited: Instant::now() - started,
                    reason: "cancelled".to_string(),
                });
            }
        }
    }

    /// Confirm the node advertises a usable public IPv4.
    pub async fn check_public_config(&self, node: NodeId) -> Result<(), ValidationError> {
        let config = self
            .gateway
            .public_config(node)
            .await
            .map_err(|e| ValidationError::NoPublicConfig {
                node,
                reason: format!("couldn't get public config: {e}"),
            })?;

        match config {
            Some(cfg) if cfg.has_ipv4() => Ok(()),
            Some(_) => Err(ValidationError::NoPublicConfig {
                node,
                reason: "public config doesn't contain a public IP".to_string(),
            }),
            None => Err(ValidationError::NoPublicConfig {
                node,
                reason: "node has no public config".to_string(),
            }),
        }
    }
}

/// Returns true if shutdown was signalled before the sleep finished.
async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> bool {
    let Some(shutdown) = shutdown else {
        tokio::time::sleep(duration).await;
        return false;
    };
    if *shutdown.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Verify the acting account holds at least `minimum`.
///
/// Unknown accounts count as empty.
pub async fn check_solvency<L: Ledger + ?Sized>(
    ledger: &L,
    identity: TwinId,
    minimum: u128,
) -> Result<u128, ValidationError> {
    let balance = match ledger.account_balance(identity).await {
        Ok(balance) => balance,
        Err(e) if e.is_not_found() => 0,
        Err(e) => return Err(ValidationError::Ledger(e)),
    };

    if balance < minimum {
        info!(twin_id = %identity, balance, minimum, "Insufficient balance");
        return Err(ValidationError::InsufficientBalance { balance, minimum });
    }

    Ok(balance)
}
