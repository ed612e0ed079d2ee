//! Deployment reconciliation for grid resources.
//!
//! A resource definition (gateway, kubernetes cluster, ...) is compiled into
//! one deployment per node, and the [`Reconciler`] converges the nodes to it
//! through a [`NodeGateway`]. Key concepts:
//!
//! - **Contract registry**: node to contract mapping the resource believes
//!   is live. Updated after every individual node call.
//! - **Observed view**: fields imported from the nodes, kept apart from the
//!   definition.
//! - **Action middleware**: solvency, operation, then sync, reported as
//!   diagnostics.
//!
//! # Invariants
//!
//! - A contract returned by a successful apply is never dropped from the
//!   registry until its delete succeeds
//! - Compilation is deterministic given the same definition
//! - Nothing is retried internally; retries are safe because of the above

pub mod config;
pub mod deployment;
pub mod error;
pub mod gateway;
pub mod importer;
pub mod kind;
pub mod kinds;
pub mod middleware;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod validator;

pub use config::{ConfigError, LivenessConfig, ReconcilerConfig};
pub use deployment::{
    ContentHash, Deployment, DeploymentMetadata, ResultData, ResultState, Workload, WorkloadData,
    WorkloadResult,
};
pub use error::{
    ActionKind, ApplyError, DefinitionError, NodeFailure, ReadError, ReconcileError,
    ValidationError,
};
pub use gateway::{ContractState, GatewayError, Ledger, LedgerError, NodeGateway, PublicConfig};
pub use importer::Importer;
pub use kind::{RemoteView, RemoteWorkload, ResourceKind};
pub use middleware::{Action, ActionMiddleware, ActionOutcome, Diagnostic, GroupState, Severity};
pub use pool::{NodeClient, NodeClientFactory, NodeClientPool, PooledGateway};
pub use reconciler::{plan, ApplyReport, NodeAction, Reconciler};
pub use registry::{ContractRegistry, ResourceState};
pub use validator::{check_solvency, Validator};

