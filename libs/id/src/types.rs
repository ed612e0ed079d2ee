//! Typed identifier definitions.
//!
//! Every identifier here is issued by a remote system; the types only keep
//! them apart.

use crate::define_id;

// =============================================================================
// Placement
// =============================================================================

define_id!(NodeId, u32, "node id");
define_id!(TwinId, u32, "twin id");

// =============================================================================
// Ledger
// =============================================================================

define_id!(ContractId, u64, "contract id");
define_id!(GroupId, u32, "group id");

// =============================================================================
// Tests
// =============================================================================
