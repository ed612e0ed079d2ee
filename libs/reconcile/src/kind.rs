//! Resource kinds.
//!
//! A kind knows how to compile its definition into per-node deployments and
//! how to read its observed fields back out of remote deployments. The
//! reconciler, validator, and registry are shared by every kind.

use std::collections::BTreeMap;
use std::fmt::Debug;

use grid_id::{NodeId, TwinId};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::deployment::{Deployment, Workload};
use crate::error::DefinitionError;
use crate::gateway::GatewayError;

/// A declarative resource that maps onto per-node deployments.
pub trait ResourceKind: Debug + Clone + Send + Sync {
    /// Fields read back from the nodes (allocated addresses and the like).
    type Observed: Debug + Clone + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    /// Kind name, stored in deployment metadata.
    const KIND: &'static str;

    fn name(&self) -> &str;

    /// Compute the deployment every node should carry.
    ///
    /// Must be deterministic: identical definitions yield identical content.
    fn compile(&self, twin_id: TwinId) -> Result<BTreeMap<NodeId, Deployment>, DefinitionError>;

    /// Node whose contract id becomes the resource identifier.
    fn primary_node(&self) -> Option<NodeId>;

    /// Nodes that must advertise a public config before deploying.
    fn public_nodes(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// Fold remote content into a fresh observed view.
    ///
    /// Workloads on nodes that could not be read keep their `previous`
    /// fields; workloads that are gone or unhealthy are reset.
    fn import(&self, previous: &Self::Observed, remote: &RemoteView) -> Self::Observed;
}

/// Deployments fetched from every tracked node.
#[derive(Debug, Clone, Default)]
pub struct RemoteView {
    pub deployments: BTreeMap<NodeId, Deployment>,
    pub failures: BTreeMap<NodeId, GatewayError>,
}

/// What a remote view knows about one workload.
#[derive(Debug, Clone, Copy)]
pub enum RemoteWorkload<'a> {
    /// Present and reported healthy.
    Healthy(&'a Workload),
    /// Missing, unhealthy, or its node is not tracked.
    Absent,
    /// Its node could not be read.
    Unreadable,
}

impl RemoteView {
    pub fn workload(&self, node: NodeId, name: &str) -> RemoteWorkload<'_> {
        if self.failures.contains_key(&node) {
            return RemoteWorkload::Unreadable;
        }
        match self.deployments.get(&node).and_then(|dl| dl.get(name)) {
            Some(wl) if wl.is_healthy() => RemoteWorkload::Healthy(wl),
            _ => RemoteWorkload::Absent,
        }
    }
}
