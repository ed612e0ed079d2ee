//! Gateway proxies.
//!
//! Both proxy flavours are a single workload on a single gateway node, and
//! that node must advertise a public IPv4.

use std::collections::BTreeMap;

use grid_id::{validate_name, NodeId, TwinId};
use serde::{Deserialize, Serialize};

use crate::deployment::{
    Deployment, DeploymentMetadata, GatewayFqdnProxyData, GatewayNameProxyData, ResultData,
    Workload, WorkloadData,
};
use crate::error::DefinitionError;
use crate::kind::{RemoteView, RemoteWorkload, ResourceKind};

/// Proxy for a domain the user owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFqdnProxy {
    pub name: String,
    pub node: NodeId,
    pub fqdn: String,
    pub backends: Vec<String>,
    #[serde(default)]
    pub tls_passthrough: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub solution_type: String,
}

/// FQDN proxy as reported by its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FqdnProxyObserved {
    pub fqdn: String,
    pub backends: Vec<String>,
    pub tls_passthrough: bool,
}

impl ResourceKind for GatewayFqdnProxy {
    type Observed = FqdnProxyObserved;

    const KIND: &'static str = "gateway";

    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, twin_id: TwinId) -> Result<BTreeMap<NodeId, Deployment>, DefinitionError> {
        validate_name(&self.name)?;
        if self.fqdn.trim().is_empty() {
            return Err(DefinitionError::MissingField { field: "fqdn" });
        }
        validate_backends(&self.backends)?;

        let mut workload = Workload::new(
            self.name.clone(),
            WorkloadData::GatewayFqdnProxy(GatewayFqdnProxyData {
                fqdn: self.fqdn.clone(),
                tls_passthrough: self.tls_passthrough,
                backends: self.backends.clone(),
            }),
        );
        workload.description = self.description.clone();

        let deployment = proxy_deployment(twin_id, &self.name, &self.solution_type, workload)?;
        Ok(BTreeMap::from([(self.node, deployment)]))
    }

    fn primary_node(&self) -> Option<NodeId> {
        Some(self.node)
    }

    fn public_nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }

    fn import(&self, previous: &Self::Observed, remote: &RemoteView) -> Self::Observed {
        match remote.workload(self.node, &self.name) {
            RemoteWorkload::Healthy(wl) => match &wl.data {
                WorkloadData::GatewayFqdnProxy(data) => FqdnProxyObserved {
                    fqdn: data.fqdn.clone(),
                    backends: data.backends.clone(),
                    tls_passthrough: data.tls_passthrough,
                },
                _ => FqdnProxyObserved::default(),
            },
            RemoteWorkload::Absent => FqdnProxyObserved::default(),
            RemoteWorkload::Unreadable => previous.clone(),
        }
    }
}

/// Proxy under a name on the gateway node's own domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxy {
    pub name: String,
    pub node: NodeId,
    pub backends: Vec<String>,
    #[serde(default)]
    pub tls_passthrough: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub solution_type: String,
}

/// Name proxy as reported by its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameProxyObserved {
    pub backends: Vec<String>,
    pub tls_passthrough: bool,
    /// Full domain the node assigned to the name.
    pub fqdn: String,
}

impl ResourceKind for GatewayNameProxy {
    type Observed = NameProxyObserved;

    const KIND: &'static str = "gateway";

    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, twin_id: TwinId) -> Result<BTreeMap<NodeId, Deployment>, DefinitionError> {
        validate_name(&self.name)?;
        validate_backends(&self.backends)?;

        let mut workload = Workload::new(
            self.name.clone(),
            WorkloadData::GatewayNameProxy(GatewayNameProxyData {
                name: self.name.clone(),
                tls_passthrough: self.tls_passthrough,
                backends: self.backends.clone(),
            }),
        );
        workload.description = self.description.clone();

        let deployment = proxy_deployment(twin_id, &self.name, &self.solution_type, workload)?;
        Ok(BTreeMap::from([(self.node, deployment)]))
    }

    fn primary_node(&self) -> Option<NodeId> {
        Some(self.node)
    }

    fn public_nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }

    fn import(&self, previous: &Self::Observed, remote: &RemoteView) -> Self::Observed {
        let wl = match remote.workload(self.node, &self.name) {
            RemoteWorkload::Healthy(wl) => wl,
            RemoteWorkload::Absent => return NameProxyObserved::default(),
            RemoteWorkload::Unreadable => return previous.clone(),
        };

        let WorkloadData::GatewayNameProxy(data) = &wl.data else {
            return NameProxyObserved::default();
        };
        let fqdn = match wl.result_data() {
            Some(ResultData::Gateway { fqdn }) => fqdn.clone(),
            _ => String::new(),
        };

        NameProxyObserved {
            backends: data.backends.clone(),
            tls_passthrough: data.tls_passthrough,
            fqdn,
        }
    }
}

fn validate_backends(backends: &[String]) -> Result<(), DefinitionError> {
    if backends.is_empty() || backends.iter().any(|b| b.trim().is_empty()) {
        return Err(DefinitionError::MissingField { field: "backends" });
    }
    Ok(())
}

fn proxy_deployment(
    twin_id: TwinId,
    name: &str,
    solution_type: &str,
    workload: Workload,
) -> Result<Deployment, DefinitionError> {
    let mut dl = Deployment::new(twin_id);
    dl.metadata = DeploymentMetadata::new(GatewayFqdnProxy::KIND, name, solution_type).encode()?;
    dl.workloads.push(workload);
    Ok(dl)
}
