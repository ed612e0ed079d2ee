//! Naming policy for workloads and solutions.
//!
//! Names end up as workload names on remote nodes and as solution names in
//! contract metadata, so they are restricted to ASCII alphanumerics and
//! underscores.

use crate::IdError;

/// Message reported for names that violate the naming policy.
pub const NAME_POLICY_MESSAGE: &str = "must only include alphanumeric and underscore characters";

/// Validate a workload or solution name.
pub fn validate_name(name: &str) -> Result<(), IdError> {
    if name.is_empty() {
        return Err(IdError::Empty { kind: "name" });
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IdError::InvalidName {
            name: name.to_string(),
            message: NAME_POLICY_MESSAGE,
        });
    }

    Ok(())
}
