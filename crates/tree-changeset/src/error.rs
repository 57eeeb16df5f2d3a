//! Error type for the changeset algebra.
//!
//! Malformed input and broken internal invariants are reported as values
//! rather than panics; callers decide whether a failure is fatal.

use thiserror::Error;

use crate::field_kinds::FieldKindIdentifier;
use crate::ids::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangesetError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("field kind mismatch: expected {expected}, found {found}")]
    FieldKindMismatch {
        expected: FieldKindIdentifier,
        found: FieldKindIdentifier,
    },
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("cross-field effects did not settle after {passes} passes")]
    FixpointDidNotConverge { passes: usize },
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
}

pub type Result<T> = std::result::Result<T, ChangesetError>;

/// Returns an [`ChangesetError::InvariantViolation`] when `$cond` is false.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::ChangesetError::InvariantViolation(format!($($arg)+)));
        }
    };
}

/// Returns an [`ChangesetError::InvariantViolation`] unconditionally.
macro_rules! fail {
    ($($arg:tt)+) => {
        return Err($crate::error::ChangesetError::InvariantViolation(format!($($arg)+)))
    };
}

pub(crate) use ensure;
pub(crate) use fail;
