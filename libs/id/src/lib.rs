//! # grid-id
//!
//! Typed identifiers and name validation for grid deployments.
//!
//! ## Design Principles
//!
//! - Identifiers are issued remotely (nodes, twins, contracts); this crate
//!   only types them so a node id can never be passed where a contract id
//!   is expected
//! - All identifiers have a canonical decimal string form with strict parsing
//! - Names are user-controlled labels and are validated, never generated
//!
//! ## Examples
//!
//! - `NodeId`: `11`
//! - `ContractId`: `4203`
//! - workload name: `master_1`

mod error;
mod macros;
mod name;
mod types;

pub use error::IdError;
pub use name::{validate_name, NAME_POLICY_MESSAGE};
pub use types::*;
