//! Configuration of a [`ModularChangeFamily`](super::ModularChangeFamily).

use serde::Deserialize;

/// Tuning knobs for [`ModularChangeFamily`](super::ModularChangeFamily).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChangeFamilyConfig {
    /// Upper bound on re-runs of invalidated fields in one operation.
    pub max_fixpoint_passes: usize,
    /// Check every produced changeset's structure before returning it.
    pub validate_outputs: bool,
}

impl Default for ChangeFamilyConfig {
    fn default() -> Self {
        Self {
            max_fixpoint_passes: 64,
            validate_outputs: cfg!(debug_assertions),
        }
    }
}
