//! Contract registry and persisted resource state.
//!
//! The registry maps each node to the contract the resource believes is live
//! there. It is written only by the reconciler and persisted by the caller
//! between calls, together with the definition and the last observed view.

use std::collections::BTreeMap;

use grid_id::{ContractId, NodeId};
use serde::{Deserialize, Serialize};

use crate::kind::ResourceKind;

/// Node to contract mapping for one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractRegistry(BTreeMap<NodeId, ContractId>);

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<ContractId> {
        self.0.get(&node).copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.0.contains_key(&node)
    }

    /// Record a contract for a node.
    ///
    /// Zero ids mean "no contract" and are ignored. Returns true if the
    /// entry was recorded.
    pub fn record(&mut self, node: NodeId, contract_id: ContractId) -> bool {
        if contract_id.is_zero() {
            return false;
        }
        self.0.insert(node, contract_id);
        true
    }

    pub fn remove(&mut self, node: NodeId) -> Option<ContractId> {
        self.0.remove(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, ContractId)> + '_ {
        self.0.iter().map(|(n, c)| (*n, *c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(NodeId, ContractId)> for ContractRegistry {
    fn from_iter<I: IntoIterator<Item = (NodeId, ContractId)>>(iter: I) -> Self {
        let mut registry = Self::new();
        for (node, contract_id) in iter {
            registry.record(node, contract_id);
        }
        registry
    }
}

/// Everything persisted for one resource instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: serde::de::DeserializeOwned"
))]
pub struct ResourceState<K: ResourceKind> {
    /// Externally visible identifier. Empty means not deployed.
    #[serde(default)]
    pub id: String,

    /// Desired state as declared by the caller.
    pub definition: K,

    #[serde(default)]
    pub contracts: ContractRegistry,

    /// Last view imported from the nodes.
    #[serde(default)]
    pub observed: K::Observed,
}

impl<K: ResourceKind> ResourceState<K> {
    /// State for a resource that has never been deployed.
    pub fn new(definition: K) -> Self {
        Self {
            id: String::new(),
            definition,
            contracts: ContractRegistry::new(),
            observed: K::Observed::default(),
        }
    }

    /// True while any contract is tracked.
    ///
    /// The identifier can still be empty here: it only comes from the
    /// primary node, so a resource whose primary apply failed may hold live
    /// contracts on other nodes.
    pub fn is_deployed(&self) -> bool {
        !self.contracts.is_empty()
    }

    /// Derive the identifier from the primary node's contract, if unset.
    pub(crate) fn adopt_primary_contract(&mut self) {
        if !self.id.is_empty() {
            return;
        }
        let Some(primary) = self.definition.primary_node() else {
            return;
        };
        if let Some(contract_id) = self.contracts.get(primary) {
            self.id = contract_id.to_string();
        }
    }

    /// Clear the identifier once nothing is tracked anymore.
    pub(crate) fn clear_id_if_untracked(&mut self) {
        if self.contracts.is_empty() {
            self.id.clear();
        }
    }
}
