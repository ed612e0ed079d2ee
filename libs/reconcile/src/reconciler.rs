//! Reconciler: deploy, cancel, and sync for any resource kind.
//!
//! Desired deployments are diffed against the contract registry into one
//! action per node. Actions are applied through the node gateway and the
//! registry is updated as each node's call returns, so a failure on one node
//! never loses a contract created on another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use grid_id::{ContractId, NodeId, TwinId};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcilerConfig;
use crate::deployment::{ContentHash, Deployment};
use crate::error::{
    ActionKind, ApplyError, DefinitionError, NodeFailure, ReadError, ReconcileError,
    ValidationError,
};
use crate::gateway::{ContractState, GatewayError, Ledger, NodeGateway};
use crate::importer::Importer;
use crate::kind::ResourceKind;
use crate::registry::{ContractRegistry, ResourceState};
use crate::validator::{check_solvency, Validator};

/// What to do on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Desired but not tracked.
    Create { node: NodeId, deployment: Deployment },

    /// Desired and tracked. Skipped if the remote content already matches.
    Update {
        node: NodeId,
        contract_id: ContractId,
        deployment: Deployment,
        hash: ContentHash,
    },

    /// Tracked but no longer desired.
    Delete { node: NodeId, contract_id: ContractId },
}

impl NodeAction {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Create { node, .. } | Self::Update { node, .. } | Self::Delete { node, .. } => {
                *node
            }
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::Update { .. } => ActionKind::Update,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn contract_id(&self) -> Option<ContractId> {
        match self {
            Self::Create { .. } => None,
            Self::Update { contract_id, .. } | Self::Delete { contract_id, .. } => {
                Some(*contract_id)
            }
        }
    }
}

/// Compute one action per node present in either `current` or `desired`.
///
/// Pure; actions come out ordered by node id.
pub fn plan(
    current: &ContractRegistry,
    mut desired: BTreeMap<NodeId, Deployment>,
) -> Result<Vec<NodeAction>, DefinitionError> {
    let nodes: BTreeSet<NodeId> = desired.keys().copied().chain(current.nodes()).collect();

    let mut actions = Vec::with_capacity(nodes.len());
    for node in nodes {
        let action = match (desired.remove(&node), current.get(node)) {
            (Some(deployment), None) => NodeAction::Create { node, deployment },
            (Some(deployment), Some(contract_id)) => {
                let hash = deployment.content_hash()?;
                NodeAction::Update {
                    node,
                    contract_id,
                    deployment,
                    hash,
                }
            }
            (None, Some(contract_id)) => NodeAction::Delete { node, contract_id },
            (None, None) => continue,
        };
        actions.push(action);
    }

    Ok(actions)
}

/// Nodes touched by a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    pub unchanged: Vec<NodeId>,
    pub deleted: Vec<NodeId>,
}

impl ApplyReport {
    /// Returns true if no node was created, updated, or deleted.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    fn sort(&mut self) {
        self.created.sort();
        self.updated.sort();
        self.unchanged.sort();
        self.deleted.sort();
    }
}

enum Outcome {
    Applied(ContractId),
    Unchanged,
    Deleted,
    Failed(GatewayError),
}

/// The reconciliation engine, shared by every resource kind.
pub struct Reconciler<G, L> {
    gateway: Arc<G>,
    ledger: Arc<L>,
    twin_id: TwinId,
    validator: Validator<G>,
    importer: Importer<G>,
    config: ReconcilerConfig,
}

impl<G: NodeGateway, L: Ledger> Reconciler<G, L> {
    /// Create a reconciler acting as `twin_id`.
    pub fn new(gateway: Arc<G>, ledger: Arc<L>, twin_id: TwinId, config: ReconcilerConfig) -> Self {
        Self {
            validator: Validator::new(Arc::clone(&gateway), config.liveness.clone()),
            importer: Importer::new(Arc::clone(&gateway)),
            gateway,
            ledger,
            twin_id,
            config,
        }
    }

    /// Abort liveness probing once `shutdown` flips to true.
    pub fn with_shutdown(self, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            validator: self.validator.with_shutdown(shutdown),
            ..self
        }
    }

    pub fn twin_id(&self) -> TwinId {
        self.twin_id
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Verify the acting account holds the configured minimum balance.
    pub async fn check_solvency(&self) -> Result<u128, ValidationError> {
        check_solvency(self.ledger.as_ref(), self.twin_id, self.config.min_balance).await
    }

    /// Converge the nodes to the resource definition.
    ///
    /// On [`ReconcileError::Apply`] the registry in `state` already reflects
    /// every node that succeeded and must be persisted.
    #[instrument(skip_all, fields(kind = K::KIND, name = %state.definition.name()))]
    pub async fn deploy<K: ResourceKind>(
        &self,
        state: &mut ResourceState<K>,
    ) -> Result<ApplyReport, ReconcileError> {
        let desired = state.definition.compile(self.twin_id)?;
        let nodes: Vec<NodeId> = desired.keys().copied().collect();
        self.validator
            .validate(&nodes, &state.definition.public_nodes())
            .await?;

        let actions = plan(&state.contracts, desired)?;
        let result = self.apply(actions, &mut state.contracts).await;

        state.adopt_primary_contract();
        state.clear_id_if_untracked();

        let report = result?;
        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            deleted = report.deleted.len(),
            id = %state.id,
            "Deploy complete"
        );
        Ok(report)
    }

    /// Delete every tracked deployment.
    ///
    /// Nodes that fail stay in the registry so a retry only revisits them.
    #[instrument(skip_all, fields(kind = K::KIND, name = %state.definition.name()))]
    pub async fn cancel<K: ResourceKind>(
        &self,
        state: &mut ResourceState<K>,
    ) -> Result<ApplyReport, ReconcileError> {
        let actions = plan(&state.contracts, BTreeMap::new())?;
        let result = self.apply(actions, &mut state.contracts).await;
        state.clear_id_if_untracked();

        let report = result?;
        info!(deleted = report.deleted.len(), "Cancel complete");
        Ok(report)
    }

    /// Prune invalid contracts, then import observed fields from the rest.
    #[instrument(skip_all, fields(kind = K::KIND, name = %state.definition.name()))]
    pub async fn sync<K: ResourceKind>(&self, state: &mut ResourceState<K>) -> Result<(), ReadError> {
        self.prune(&mut state.contracts).await?;
        // Nothing active anymore: the resource reads as not deployed.
        state.clear_id_if_untracked();
        self.importer.import(state).await
    }

    /// Remove registry entries whose contract is no longer valid.
    ///
    /// All-or-nothing: if any lookup fails the registry is left untouched.
    pub async fn prune(&self, registry: &mut ContractRegistry) -> Result<Vec<NodeId>, ReadError> {
        let checks = registry.iter().map(|(node, contract_id)| async move {
            (node, contract_id, self.ledger.contract_state(contract_id).await)
        });

        let mut invalid = Vec::new();
        for (node, contract_id, state) in join_all(checks).await {
            match state.map_err(ReadError::Prune)? {
                ContractState::Valid => {}
                ContractState::Invalid => invalid.push((node, contract_id)),
            }
        }

        for (node, contract_id) in &invalid {
            info!(node_id = %node, contract_id = %contract_id, "Dropping invalid contract");
            registry.remove(*node);
        }

        Ok(invalid.into_iter().map(|(node, _)| node).collect())
    }

    async fn apply(
        &self,
        actions: Vec<NodeAction>,
        registry: &mut ContractRegistry,
    ) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();
        let mut failures = BTreeMap::new();

        let mut results = stream::iter(actions)
            .map(|action| async move {
                let outcome = self.execute(&action).await;
                (action, outcome)
            })
            .buffer_unordered(self.config.apply_parallelism.max(1));

        // Results are drained one at a time, so registry writes never race.
        while let Some((action, outcome)) = results.next().await {
            let node = action.node();
            match outcome {
                Outcome::Applied(contract_id) => {
                    registry.record(node, contract_id);
                    info!(
                        node_id = %node,
                        contract_id = %contract_id,
                        action = %action.kind(),
                        "Deployment applied"
                    );
                    match action.kind() {
                        ActionKind::Create => report.created.push(node),
                        _ => report.updated.push(node),
                    }
                }
                Outcome::Unchanged => {
                    debug!(node_id = %node, "Deployment already up to date");
                    report.unchanged.push(node);
                }
                Outcome::Deleted => {
                    registry.remove(node);
                    info!(node_id = %node, contract_id = ?action.contract_id(), "Deployment deleted");
                    report.deleted.push(node);
                }
                Outcome::Failed(error) => {
                    warn!(
                        node_id = %node,
                        action = %action.kind(),
                        error = %error,
                        "Node call failed"
                    );
                    failures.insert(
                        node,
                        NodeFailure {
                            action: action.kind(),
                            contract_id: action.contract_id(),
                            error,
                        },
                    );
                }
            }
        }

        report.sort();
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ApplyError { failures })
        }
    }

    async fn execute(&self, action: &NodeAction) -> Outcome {
        match action {
            NodeAction::Create { node, deployment } => {
                self.submit(*node, None, deployment).await
            }
            NodeAction::Update {
                node,
                contract_id,
                deployment,
                hash,
            } => match self.gateway.get(*node, *contract_id).await {
                Ok(remote) if remote.content_hash().ok().as_ref() == Some(hash) => {
                    Outcome::Unchanged
                }
                Ok(_) => self.submit(*node, Some(*contract_id), deployment).await,
                Err(e) => Outcome::Failed(e),
            },
            NodeAction::Delete { node, contract_id } => {
                match self.gateway.delete(*node, *contract_id).await {
                    Ok(()) => Outcome::Deleted,
                    Err(e) => Outcome::Failed(e),
                }
            }
        }
    }

    async fn submit(
        &self,
        node: NodeId,
        existing: Option<ContractId>,
        deployment: &Deployment,
    ) -> Outcome {
        match self.gateway.apply(node, existing, deployment).await {
            Ok(contract_id) if contract_id.is_zero() => Outcome::Failed(GatewayError::Rejected {
                node,
                message: "node returned no contract id".to_string(),
            }),
            Ok(contract_id) => Outcome::Applied(contract_id),
            Err(e) => Outcome::Failed(e),
        }
    }
}
