//! tree-changeset: changeset algebra for collaboratively edited trees.
//!
//! Edits to a tree-shaped document are described as changesets that can be
//! composed, inverted and rebased over each other, so that replicas applying
//! the same acknowledged history converge. Each field of a node carries a
//! field-kind specific changeset; the modular layer stitches them together
//! and coordinates moves whose two ends live in different fields.

// Core identifiers and collaborator interfaces
pub mod ids;
pub mod revision;
pub mod tree;
pub mod delta;
pub mod error;

pub mod cross_field;
pub mod field_kinds;
pub mod sequence_field;
pub mod modular;

pub use error::{ChangesetError, Result};
pub use field_kinds::{FieldChange, FieldKindIdentifier, NodeExistenceState};
pub use ids::{ChangeAtomId, ChangesetLocalId, IdAllocator, NodeId, RevisionTag};
pub use modular::{
    ChangeFamilyConfig, ModularChangeFamily, ModularChangeset, ModularEditBuilder, NodeChangeset,
};
pub use revision::{RevisionInfo, RevisionMetadata, TaggedChange};
pub use tree::{FieldId, FieldKey, FieldUpPath, UpPath};
