use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use grid_id::{ContractId, NodeId};
use grid_reconcile::deployment::ZMachineResult;
use grid_reconcile::{
    Deployment, GatewayError, NodeGateway, PublicConfig, ResultData, ResultState, WorkloadData,
    WorkloadResult,
};
use tracing::debug;

/// One call received by [`FakeGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Apply {
        node: NodeId,
        existing: Option<ContractId>,
    },
    Delete {
        node: NodeId,
        contract_id: ContractId,
    },
    Get {
        node: NodeId,
        contract_id: ContractId,
    },
    IsLive {
        node: NodeId,
    },
    PublicConfig {
        node: NodeId,
    },
}

impl GatewayCall {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Apply { node, .. }
            | Self::Delete { node, .. }
            | Self::Get { node, .. }
            | Self::IsLive { node }
            | Self::PublicConfig { node } => *node,
        }
    }

    /// Returns true for calls that change remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Apply { .. } | Self::Delete { .. })
    }
}

#[derive(Default)]
struct Inner {
    issued: u64,
    deployments: BTreeMap<ContractId, (NodeId, Deployment)>,
    calls: Vec<GatewayCall>,
    apply_failures: HashMap<NodeId, GatewayError>,
    delete_failures: HashMap<NodeId, GatewayError>,
    get_failures: HashMap<NodeId, GatewayError>,
    offline: BTreeSet<NodeId>,
    public_configs: HashMap<NodeId, PublicConfig>,
    created: Vec<ContractId>,
}

/// In-memory [`NodeGateway`].
///
/// Contract ids are issued as 100, 200, 300, ... in creation order. Every
/// node is live until taken offline, and has no public config until one is
/// set.
#[derive(Default)]
pub struct FakeGateway {
    inner: Mutex<Inner>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give `node` a public config with an IPv4.
    pub fn set_public_config(&self, node: NodeId) {
        let config = PublicConfig {
            ipv4: format!("185.206.122.{}/24", node.value()),
            gateway: "185.206.122.1".to_string(),
            domain: format!("gent0{}.grid.tf", node.value()),
            ..Default::default()
        };
        self.inner().public_configs.insert(node, config);
    }

    pub fn set_offline(&self, node: NodeId, offline: bool) {
        let mut inner = self.inner();
        if offline {
            inner.offline.insert(node);
        } else {
            inner.offline.remove(&node);
        }
    }

    /// Make applies on `node` time out until cleared.
    pub fn fail_apply(&self, node: NodeId) {
        self.inner().apply_failures.insert(
            node,
            GatewayError::Timeout {
                node,
                timeout: Duration::from_secs(10),
            },
        );
    }

    pub fn fail_delete(&self, node: NodeId) {
        self.inner().delete_failures.insert(
            node,
            GatewayError::Transport {
                node,
                message: "connection reset by peer".to_string(),
            },
        );
    }

    pub fn fail_get(&self, node: NodeId) {
        self.inner().get_failures.insert(
            node,
            GatewayError::Timeout {
                node,
                timeout: Duration::from_secs(10),
            },
        );
    }

    /// Clear every injected failure on `node`.
    pub fn heal(&self, node: NodeId) {
        let mut inner = self.inner();
        inner.apply_failures.remove(&node);
        inner.delete_failures.remove(&node);
        inner.get_failures.remove(&node);
        inner.offline.remove(&node);
    }

    /// Flip a workload's result to error, as a node does when it crashes.
    pub fn mark_unhealthy(&self, contract_id: ContractId, workload: &str) {
        if let Some((_, dl)) = self.inner().deployments.get_mut(&contract_id) {
            for wl in dl.workloads.iter_mut().filter(|wl| wl.name == workload) {
                if let Some(result) = wl.result.as_mut() {
                    result.state = ResultState::Error;
                    result.error = "workload crashed".to_string();
                }
            }
        }
    }

    /// Drop a workload from a deployment behind the reconciler's back.
    pub fn remove_workload(&self, contract_id: ContractId, workload: &str) {
        if let Some((_, dl)) = self.inner().deployments.get_mut(&contract_id) {
            dl.workloads.retain(|wl| wl.name != workload);
        }
    }

    /// Contracts currently live, with their node.
    pub fn live_contracts(&self) -> BTreeMap<ContractId, NodeId> {
        self.inner()
            .deployments
            .iter()
            .map(|(id, (node, _))| (*id, *node))
            .collect()
    }

    /// Every contract id ever returned by a successful create.
    pub fn created_contracts(&self) -> Vec<ContractId> {
        self.inner().created.clone()
    }

    pub fn deployment(&self, contract_id: ContractId) -> Option<Deployment> {
        self.inner()
            .deployments
            .get(&contract_id)
            .map(|(_, dl)| dl.clone())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<GatewayCall> {
        self.inner()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner().calls.clear();
    }
}

/// Fill in the results a healthy node would report.
fn settle(node: NodeId, dl: &mut Deployment) {
    let n = node.value();
    for wl in &mut dl.workloads {
        let data = match &wl.data {
            WorkloadData::GatewayNameProxy(proxy) => ResultData::Gateway {
                fqdn: format!("{}.gent0{n}.grid.tf", proxy.name),
            },
            WorkloadData::GatewayFqdnProxy(_) => ResultData::None,
            WorkloadData::ZMachine(vm) => {
                let host = host_octet(&wl.name);
                ResultData::ZMachine(ZMachineResult {
                    ip: if vm.ip.is_empty() {
                        format!("10.20.{n}.{host}")
                    } else {
                        vm.ip.clone()
                    },
                    computed_ip: if vm.public_ip {
                        format!("185.206.122.{host}/24")
                    } else {
                        String::new()
                    },
                    computed_ip6: if vm.public_ip6 {
                        format!("2a10:b600:1::{host:x}/64")
                    } else {
                        String::new()
                    },
                    planetary_ip: if vm.planetary {
                        format!("300:e9c4:9048:57cf::{host:x}")
                    } else {
                        String::new()
                    },
                    mycelium_ip: if vm.mycelium_seed.is_empty() {
                        String::new()
                    } else {
                        format!("400:{n:x}::{}", vm.mycelium_seed)
                    },
                    console_url: format!("10.20.{n}.1:20002"),
                })
            }
        };
        wl.result = Some(WorkloadResult {
            state: ResultState::Ok,
            error: String::new(),
            data,
        });
    }
}

/// Stable per-workload address octet.
fn host_octet(name: &str) -> u8 {
    let sum: u32 = name.bytes().map(u32::from).sum();
    (sum % 250) as u8 + 2
}

#[async_trait]
impl NodeGateway for FakeGateway {
    async fn apply(
        &self,
        node: NodeId,
        existing: Option<ContractId>,
        deployment: &Deployment,
    ) -> Result<ContractId, GatewayError> {
        let mut inner = self.inner();
        inner.calls.push(GatewayCall::Apply { node, existing });
        if let Some(err) = inner.apply_failures.get(&node) {
            return Err(err.clone());
        }

        let mut dl = deployment.clone();
        settle(node, &mut dl);

        match existing {
            Some(contract_id) => {
                let Some((owner, current)) = inner.deployments.get_mut(&contract_id) else {
                    return Err(GatewayError::NotFound { node, contract_id });
                };
                if *owner != node {
                    return Err(GatewayError::NotFound { node, contract_id });
                }
                dl.version = current.version + 1;
                *current = dl;
                debug!(node_id = %node, contract_id = %contract_id, "[FAKE] Updated deployment");
                Ok(contract_id)
            }
            None => {
                inner.issued += 1;
                let contract_id = ContractId::new(inner.issued * 100);
                dl.version = 1;
                inner.deployments.insert(contract_id, (node, dl));
                inner.created.push(contract_id);
                debug!(node_id = %node, contract_id = %contract_id, "[FAKE] Created deployment");
                Ok(contract_id)
            }
        }
    }

    async fn delete(&self, node: NodeId, contract_id: ContractId) -> Result<(), GatewayError> {
        let mut inner = self.inner();
        inner.calls.push(GatewayCall::Delete { node, contract_id });
        if let Some(err) = inner.delete_failures.get(&node) {
            return Err(err.clone());
        }

        let owned = inner
            .deployments
            .get(&contract_id)
            .is_some_and(|(owner, _)| *owner == node);
        if !owned {
            return Err(GatewayError::NotFound { node, contract_id });
        }
        inner.deployments.remove(&contract_id);
        Ok(())
    }

    async fn get(&self, node: NodeId, contract_id: ContractId) -> Result<Deployment, GatewayError> {
        let mut inner = self.inner();
        inner.calls.push(GatewayCall::Get { node, contract_id });
        if let Some(err) = inner.get_failures.get(&node) {
            return Err(err.clone());
        }

        match inner.deployments.get(&contract_id) {
            Some((owner, dl)) if *owner == node => Ok(dl.clone()),
            _ => Err(GatewayError::NotFound { node, contract_id }),
        }
    }

    async fn is_live(&self, node: NodeId) -> Result<bool, GatewayError> {
        let mut inner = self.inner();
        inner.calls.push(GatewayCall::IsLive { node });
        Ok(!inner.offline.contains(&node))
    }

    async fn public_config(&self, node: NodeId) -> Result<Option<PublicConfig>, GatewayError> {
        let mut inner = self.inner();
        inner.calls.push(GatewayCall::PublicConfig { node });
        Ok(inner.public_configs.get(&node).cloned())
    }
}
