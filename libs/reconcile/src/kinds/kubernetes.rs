//! Kubernetes clusters.
//!
//! A cluster is one master and any number of workers, each a virtual machine
//! on the cluster network. Members sharing a node share that node's
//! deployment.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use grid_id::{validate_name, NodeId, TwinId};
use serde::{Deserialize, Serialize};

use crate::deployment::{
    Deployment, DeploymentMetadata, ResultData, Workload, WorkloadData, ZMachineData,
    ZMachineResult,
};
use crate::error::DefinitionError;
use crate::kind::{RemoteView, RemoteWorkload, ResourceKind};

pub const DEFAULT_FLIST: &str = "https://hub.grid.tf/tf-official-apps/threefolddev-k3s-v1.31.0.flist";
pub const DEFAULT_ENTRYPOINT: &str = "/sbin/zinit init";

const CPU_RANGE: (u64, u64) = (1, 32);
const MEMORY_MB_RANGE: (u64, u64) = (256, 256 * 1024);
const DISK_GB_RANGE: (u64, u64) = (1, 10 * 1024);
const MYCELIUM_SEED_LEN: usize = 6;

/// A kubernetes cluster definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesCluster {
    pub name: String,
    #[serde(default)]
    pub solution_type: String,
    pub network_name: String,
    /// Shared secret every member joins the cluster with.
    pub token: String,
    #[serde(default)]
    pub ssh_key: String,
    /// Cluster-wide flist, used by members that don't set their own.
    #[serde(default)]
    pub flist: String,
    #[serde(default)]
    pub entrypoint: String,
    pub master: ClusterNode,
    #[serde(default)]
    pub workers: Vec<ClusterNode>,
    /// Network IP range reserved on each member node, e.g. `10.20.2.0/24`.
    ///
    /// Members on a node take private addresses from its range in
    /// declaration order, starting at host `.2`.
    pub nodes_ip_range: BTreeMap<NodeId, String>,
}

/// One cluster member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub node: NodeId,
    pub cpu: u8,
    pub memory_mb: u64,
    pub disk_gb: u64,
    #[serde(default)]
    pub public_ip: bool,
    #[serde(default)]
    pub public_ip6: bool,
    #[serde(default)]
    pub planetary: bool,
    /// Hex encoded, 6 bytes. Pins the mycelium IP across redeploys.
    #[serde(default)]
    pub mycelium_ip_seed: String,
    #[serde(default)]
    pub flist: String,
    #[serde(default)]
    pub flist_checksum: String,
    #[serde(default)]
    pub entrypoint: String,
}

/// Addresses allocated to one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNodeObserved {
    pub ip: String,
    pub computed_ip: String,
    pub computed_ip6: String,
    pub planetary_ip: String,
    pub mycelium_ip: String,
    pub console_url: String,
}

impl From<&ZMachineResult> for ClusterNodeObserved {
    fn from(res: &ZMachineResult) -> Self {
        Self {
            ip: res.ip.clone(),
            computed_ip: res.computed_ip.clone(),
            computed_ip6: res.computed_ip6.clone(),
            planetary_ip: res.planetary_ip.clone(),
            mycelium_ip: res.mycelium_ip.clone(),
            console_url: res.console_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesObserved {
    pub master: ClusterNodeObserved,
    /// Keyed by worker name.
    #[serde(default)]
    pub workers: BTreeMap<String, ClusterNodeObserved>,
}

impl KubernetesCluster {
    fn members(&self) -> impl Iterator<Item = &ClusterNode> {
        std::iter::once(&self.master).chain(self.workers.iter())
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        validate_name(&self.name)?;

        if self.network_name.trim().is_empty() {
            return Err(DefinitionError::MissingField {
                field: "network_name",
            });
        }

        if self.token.is_empty() || !self.token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DefinitionError::InvalidToken);
        }

        let mut names = BTreeSet::new();
        for member in self.members() {
            validate_name(&member.name)?;
            if !names.insert(member.name.as_str()) {
                return Err(DefinitionError::DuplicateName {
                    name: member.name.clone(),
                });
            }

            check_range("cpu", u64::from(member.cpu), CPU_RANGE)?;
            check_range("memory", member.memory_mb, MEMORY_MB_RANGE)?;
            check_range("disk_size", member.disk_gb, DISK_GB_RANGE)?;

            if !member.mycelium_ip_seed.is_empty() {
                let valid = hex::decode(&member.mycelium_ip_seed)
                    .map(|bytes| bytes.len() == MYCELIUM_SEED_LEN)
                    .unwrap_or(false);
                if !valid {
                    return Err(DefinitionError::InvalidMyceliumSeed {
                        seed: member.mycelium_ip_seed.clone(),
                    });
                }
            }

            if !self.nodes_ip_range.contains_key(&member.node) {
                return Err(DefinitionError::MissingNodeRange { node: member.node });
            }
        }

        Ok(())
    }

    /// Address of the `index`th member placed on `node`.
    fn private_ip(&self, node: NodeId, index: usize) -> Result<Ipv4Addr, DefinitionError> {
        let range = self
            .nodes_ip_range
            .get(&node)
            .ok_or(DefinitionError::MissingNodeRange { node })?;
        let invalid = || DefinitionError::InvalidNodeRange {
            node,
            range: range.clone(),
        };

        let (addr, prefix) = range.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 30 {
            return Err(invalid());
        }

        let size = 1u64 << (32 - prefix);
        let network = u64::from(u32::from(addr)) & !(size - 1);
        let host = index as u64 + 2;
        // Last address is broadcast.
        if host >= size - 1 {
            return Err(DefinitionError::NodeRangeExhausted {
                node,
                range: range.clone(),
            });
        }
        u32::try_from(network + host)
            .map(Ipv4Addr::from)
            .map_err(|_| invalid())
    }

    fn member_workload(&self, member: &ClusterNode, is_master: bool, ip: Ipv4Addr) -> Workload {
        let flist = first_non_empty(&[&member.flist, &self.flist, DEFAULT_FLIST]);
        let entrypoint = first_non_empty(&[&member.entrypoint, &self.entrypoint, DEFAULT_ENTRYPOINT]);

        let mut env = BTreeMap::new();
        env.insert("K3S_TOKEN".to_string(), self.token.clone());
        env.insert("K3S_NODE_NAME".to_string(), member.name.clone());
        env.insert("K3S_DATA_DIR".to_string(), "/mydisk".to_string());
        env.insert("K3S_FLANNEL_IFACE".to_string(), "eth0".to_string());
        env.insert("SSH_KEY".to_string(), self.ssh_key.clone());
        if !is_master {
            env.insert("K3S_MASTER".to_string(), self.master.name.clone());
        }

        Workload::new(
            member.name.clone(),
            WorkloadData::ZMachine(ZMachineData {
                flist: flist.to_string(),
                entrypoint: entrypoint.to_string(),
                flist_checksum: member.flist_checksum.clone(),
                network: self.network_name.clone(),
                ip: ip.to_string(),
                cpu: member.cpu,
                memory_mb: member.memory_mb,
                disk_gb: member.disk_gb,
                public_ip: member.public_ip,
                public_ip6: member.public_ip6,
                planetary: member.planetary,
                mycelium_seed: member.mycelium_ip_seed.clone(),
                env,
            }),
        )
    }
}

impl ResourceKind for KubernetesCluster {
    type Observed = KubernetesObserved;

    const KIND: &'static str = "kubernetes";

    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, twin_id: TwinId) -> Result<BTreeMap<NodeId, Deployment>, DefinitionError> {
        self.validate()?;

        let metadata = DeploymentMetadata::new(Self::KIND, &self.name, &self.solution_type).encode()?;

        let mut deployments: BTreeMap<NodeId, Deployment> = BTreeMap::new();
        let members = std::iter::once((&self.master, true))
            .chain(self.workers.iter().map(|w| (w, false)));
        for (member, is_master) in members {
            let dl = deployments.entry(member.node).or_insert_with(|| {
                let mut dl = Deployment::new(twin_id);
                dl.metadata = metadata.clone();
                dl
            });
            let ip = self.private_ip(member.node, dl.workloads.len())?;
            dl.workloads.push(self.member_workload(member, is_master, ip));
        }

        Ok(deployments)
    }

    fn primary_node(&self) -> Option<NodeId> {
        Some(self.master.node)
    }

    fn import(&self, previous: &Self::Observed, remote: &RemoteView) -> Self::Observed {
        let master = import_member(&self.master, &previous.master, remote);

        let workers = self
            .workers
            .iter()
            .map(|w| {
                let prev = previous.workers.get(&w.name).cloned().unwrap_or_default();
                (w.name.clone(), import_member(w, &prev, remote))
            })
            .collect();

        KubernetesObserved { master, workers }
    }
}

fn import_member(
    member: &ClusterNode,
    previous: &ClusterNodeObserved,
    remote: &RemoteView,
) -> ClusterNodeObserved {
    match remote.workload(member.node, &member.name) {
        RemoteWorkload::Healthy(wl) => match wl.result_data() {
            Some(ResultData::ZMachine(res)) => ClusterNodeObserved::from(res),
            _ => ClusterNodeObserved::default(),
        },
        RemoteWorkload::Absent => ClusterNodeObserved::default(),
        RemoteWorkload::Unreadable => previous.clone(),
    }
}

fn check_range(field: &str, actual: u64, (min, max): (u64, u64)) -> Result<(), DefinitionError> {
    if actual < min || actual > max {
        return Err(DefinitionError::OutOfRange {
            field: field.to_string(),
            min,
            max,
            actual,
        });
    }
    Ok(())
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}
