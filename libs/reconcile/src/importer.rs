//! Remote-state import.
//!
//! Reads every tracked deployment back from its node and lets the resource
//! kind rebuild its observed view from what it finds.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::ReadError;
use crate::gateway::NodeGateway;
use crate::kind::{RemoteView, ResourceKind};
use crate::registry::{ContractRegistry, ResourceState};

pub struct Importer<G> {
    gateway: Arc<G>,
}

impl<G: NodeGateway> Importer<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Fetch every tracked deployment concurrently.
    ///
    /// Per-node failures are collected into the view rather than aborting.
    pub async fn fetch(&self, registry: &ContractRegistry) -> RemoteView {
        let fetches = registry.iter().map(|(node, contract_id)| async move {
            (node, self.gateway.get(node, contract_id).await)
        });

        let mut view = RemoteView::default();
        for (node, result) in join_all(fetches).await {
            match result {
                Ok(deployment) => {
                    debug!(
                        node_id = %node,
                        version = deployment.version,
                        workloads = deployment.workloads.len(),
                        "Fetched deployment"
                    );
                    view.deployments.insert(node, deployment);
                }
                Err(e) => {
                    warn!(node_id = %node, error = %e, "Failed to fetch deployment");
                    view.failures.insert(node, e);
                }
            }
        }
        view
    }

    /// Refresh `state.observed` from the nodes.
    ///
    /// Never touches the registry. Nodes that could not be read keep their
    /// previously observed fields and are reported in the error.
    pub async fn import<K: ResourceKind>(
        &self,
        state: &mut ResourceState<K>,
    ) -> Result<(), ReadError> {
        let view = self.fetch(&state.contracts).await;
        state.observed = state.definition.import(&state.observed, &view);

        if view.failures.is_empty() {
            Ok(())
        } else {
            Err(ReadError::Fetch {
                failures: view.failures,
            })
        }
    }
}
