//! Deployment model.
//!
//! A [`Deployment`] is the node-scoped bundle of workloads submitted under a
//! single contract. The reconciler only ever builds versionless deployments;
//! nodes assign and bump versions and attach a [`WorkloadResult`] to every
//! workload they accept.

use std::collections::BTreeMap;

use grid_id::TwinId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A node-scoped bundle of workloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Version assigned by the node. Zero for versionless content.
    #[serde(default)]
    pub version: u32,

    /// Twin that owns the deployment.
    pub twin_id: TwinId,

    /// Serialized [`DeploymentMetadata`].
    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub description: String,

    pub workloads: Vec<Workload>,
}

impl Deployment {
    /// Create an empty versionless deployment owned by `twin_id`.
    pub fn new(twin_id: TwinId) -> Self {
        Self {
            version: 0,
            twin_id,
            metadata: String::new(),
            description: String::new(),
            workloads: Vec::new(),
        }
    }

    /// Look up a workload by name.
    pub fn get(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// Hash of the deployment content.
    ///
    /// Covers everything the owner controls and nothing the node assigns:
    /// the version and workload results are excluded, so a converged remote
    /// deployment hashes equal to the desired one.
    pub fn content_hash(&self) -> Result<ContentHash, serde_json::Error> {
        let view = ContentView {
            twin_id: self.twin_id,
            metadata: &self.metadata,
            description: &self.description,
            workloads: self
                .workloads
                .iter()
                .map(|w| WorkloadView {
                    name: &w.name,
                    description: &w.description,
                    data: &w.data,
                })
                .collect(),
        };
        Ok(ContentHash::from_json(&serde_json::to_value(view)?))
    }
}

#[derive(Serialize)]
struct ContentView<'a> {
    twin_id: TwinId,
    metadata: &'a str,
    description: &'a str,
    workloads: Vec<WorkloadView<'a>>,
}

#[derive(Serialize)]
struct WorkloadView<'a> {
    name: &'a str,
    description: &'a str,
    data: &'a WorkloadData,
}

/// One unit of remote state within a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Unique within the deployment.
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub data: WorkloadData,

    /// Set by the node once the workload has been processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkloadResult>,
}

impl Workload {
    pub fn new(name: impl Into<String>, data: WorkloadData) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data,
            result: None,
        }
    }

    /// Returns true if the node reports the workload as running.
    pub fn is_healthy(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|r| r.state == ResultState::Ok)
    }

    /// Result data, if the node reported any.
    pub fn result_data(&self) -> Option<&ResultData> {
        self.result.as_ref().map(|r| &r.data)
    }
}

/// Workload content, tagged by workload type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadData {
    GatewayFqdnProxy(GatewayFqdnProxyData),
    GatewayNameProxy(GatewayNameProxyData),
    ZMachine(ZMachineData),
}

/// Gateway proxy for a user-owned domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFqdnProxyData {
    pub fqdn: String,
    pub tls_passthrough: bool,
    pub backends: Vec<String>,
}

/// Gateway proxy under a name reserved on the gateway node's domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxyData {
    pub name: String,
    pub tls_passthrough: bool,
    pub backends: Vec<String>,
}

/// A virtual machine with its root flist and data disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMachineData {
    pub flist: String,
    pub entrypoint: String,
    #[serde(default)]
    pub flist_checksum: String,
    pub network: String,
    /// Requested private IP. Empty lets the node pick one.
    #[serde(default)]
    pub ip: String,
    pub cpu: u8,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub public_ip: bool,
    pub public_ip6: bool,
    pub planetary: bool,
    #[serde(default)]
    pub mycelium_seed: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// State of a workload as reported by its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    Init,
    Ok,
    Error,
    Deleted,
}

/// Node-reported outcome for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub state: ResultState,
    #[serde(default)]
    pub error: String,
    pub data: ResultData,
}

/// Values allocated by the node for a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultData {
    #[default]
    None,
    Gateway {
        fqdn: String,
    },
    ZMachine(ZMachineResult),
}

/// Addresses allocated to a virtual machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMachineResult {
    pub ip: String,
    pub computed_ip: String,
    pub computed_ip6: String,
    pub planetary_ip: String,
    pub mycelium_ip: String,
    pub console_url: String,
}

/// Solution metadata stored with every deployment so other tooling can
/// group contracts by solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(rename = "projectName")]
    pub project_name: String,
}

impl DeploymentMetadata {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            project_name: project_name.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A content hash for deterministic comparison of deployments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute a content hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
