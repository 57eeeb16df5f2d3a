//! Field kinds and the handler interface the modular layer dispatches to.
//!
//! Every field of a modular changeset carries a [`FieldChange`]: a changeset
//! for one of the supported kinds. Handlers implement the algebra for their
//! own kind and call back into the modular layer for nested node changes.

pub mod generic;
pub mod optional;

use std::borrow::Cow;
use std::fmt;

use crate::cross_field::{CrossFieldKeyRange, CrossFieldManager, InverseMoveIds};
use crate::delta::{DeltaFieldChanges, DeltaFieldMap, DetachedNodeId};
use crate::error::{ChangesetError, Result};
use crate::ids::{IdAllocator, NodeId};
use crate::revision::{RevisionMetadataSource, RevisionReplacer};
use crate::sequence_field::{self, MoveEffect, SequenceFieldHandler};

pub use generic::{GenericChangeset, GenericFieldHandler};
pub use optional::{OptionalChangeset, OptionalFieldHandler, RegisterId, Replace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKindIdentifier {
    Sequence,
    Optional,
    Generic,
}

impl fmt::Display for FieldKindIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldKindIdentifier::Sequence => "sequence",
            FieldKindIdentifier::Optional => "optional",
            FieldKindIdentifier::Generic => "generic",
        })
    }
}

/// Whether a node is in the document in the context a rebase produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeExistenceState {
    Alive,
    Dead,
}

impl NodeExistenceState {
    /// A child can only be alive if its parent is.
    pub fn and(self, other: NodeExistenceState) -> NodeExistenceState {
        match (self, other) {
            (Self::Alive, Self::Alive) => Self::Alive,
            _ => Self::Dead,
        }
    }
}

/// Composes the changes to one child; at least one side is present.
pub type ComposeChild<'a> = &'a mut dyn FnMut(Option<NodeId>, Option<NodeId>) -> Result<NodeId>;
/// Rebases `(new, base)` child changes; `None` drops the child.
pub type RebaseChild<'a> =
    &'a mut dyn FnMut(Option<NodeId>, Option<NodeId>, NodeExistenceState) -> Result<Option<NodeId>>;
pub type PruneChild<'a> = &'a mut dyn FnMut(NodeId) -> Result<Option<NodeId>>;
pub type ChildDelta<'a> = &'a mut dyn FnMut(NodeId) -> Result<DeltaFieldMap>;
pub type ChildRemovedRoots<'a> = &'a mut dyn FnMut(NodeId) -> Result<Vec<DetachedNodeId>>;

/// Shared services for one field-level operation.
pub struct FieldContext<'a> {
    pub id_allocator: &'a mut IdAllocator,
    pub cross_field: &'a mut dyn CrossFieldManager<MoveEffect>,
    pub metadata: &'a dyn RevisionMetadataSource,
    /// Set while computing an inverse that is not a rollback.
    pub inverse_move_ids: Option<&'a InverseMoveIds>,
}

pub trait FieldChangeHandler {
    type Changeset: Clone + fmt::Debug + Default + PartialEq;

    const KIND: FieldKindIdentifier;

    /// `change1` then `change2`, as one changeset over `change1`'s input.
    fn compose(
        &self,
        change1: &Self::Changeset,
        change2: &Self::Changeset,
        compose_child: ComposeChild<'_>,
        cx: &mut FieldContext<'_>,
    ) -> Result<Self::Changeset>;

    fn invert(
        &self,
        change: &Self::Changeset,
        is_rollback: bool,
        cx: &mut FieldContext<'_>,
    ) -> Result<Self::Changeset>;

    /// Adapts `change` so it applies after `over`.
    fn rebase(
        &self,
        change: &Self::Changeset,
        over: &Self::Changeset,
        rebase_child: RebaseChild<'_>,
        cx: &mut FieldContext<'_>,
        existence: NodeExistenceState,
    ) -> Result<Self::Changeset>;

    fn prune(&self, change: &Self::Changeset, prune_child: PruneChild<'_>)
        -> Result<Self::Changeset>;

    fn is_empty(&self, change: &Self::Changeset) -> bool;

    fn create_empty(&self) -> Self::Changeset {
        Self::Changeset::default()
    }

    /// Detached nodes whose content a receiver needs to apply the change.
    fn relevant_removed_roots(
        &self,
        change: &Self::Changeset,
        from_child: ChildRemovedRoots<'_>,
    ) -> Result<Vec<DetachedNodeId>>;

    fn cross_field_keys(&self, change: &Self::Changeset) -> Vec<CrossFieldKeyRange>;

    fn nested_changes(&self, change: &Self::Changeset) -> Vec<NodeId>;

    fn replace_revisions(
        &self,
        change: &Self::Changeset,
        replacer: &RevisionReplacer,
    ) -> Self::Changeset;

    fn into_delta(
        &self,
        change: &Self::Changeset,
        child_delta: ChildDelta<'_>,
    ) -> Result<DeltaFieldChanges>;

    /// Builds a changeset that only carries child changes at the given indices.
    fn build_child_changes(&self, children: &[(usize, NodeId)]) -> Result<Self::Changeset>;
}

/// The changeset of one field, tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Sequence(sequence_field::Changeset),
    Optional(OptionalChangeset),
    Generic(GenericChangeset),
}

impl FieldChange {
    pub fn kind(&self) -> FieldKindIdentifier {
        match self {
            FieldChange::Sequence(_) => FieldKindIdentifier::Sequence,
            FieldChange::Optional(_) => FieldKindIdentifier::Optional,
            FieldChange::Generic(_) => FieldKindIdentifier::Generic,
        }
    }

    pub fn empty(kind: FieldKindIdentifier) -> Self {
        match kind {
            FieldKindIdentifier::Sequence => FieldChange::Sequence(SequenceFieldHandler.create_empty()),
            FieldKindIdentifier::Optional => FieldChange::Optional(OptionalFieldHandler.create_empty()),
            FieldKindIdentifier::Generic => FieldChange::Generic(GenericFieldHandler.create_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldChange::Sequence(c) => SequenceFieldHandler.is_empty(c),
            FieldChange::Optional(c) => OptionalFieldHandler.is_empty(c),
            FieldChange::Generic(c) => GenericFieldHandler.is_empty(c),
        }
    }

    /// Builds a change of `kind` that only carries child changes.
    pub fn with_child_changes(kind: FieldKindIdentifier, children: &[(usize, NodeId)]) -> Result<Self> {
        Ok(match kind {
            FieldKindIdentifier::Sequence => {
                FieldChange::Sequence(SequenceFieldHandler.build_child_changes(children)?)
            }
            FieldKindIdentifier::Optional => {
                FieldChange::Optional(OptionalFieldHandler.build_child_changes(children)?)
            }
            FieldKindIdentifier::Generic => {
                FieldChange::Generic(GenericFieldHandler.build_child_changes(children)?)
            }
        })
    }

    pub fn compose(
        &self,
        other: &FieldChange,
        compose_child: ComposeChild<'_>,
        cx: &mut FieldContext<'_>,
    ) -> Result<FieldChange> {
        let (a, b) = align_kinds(self, other)?;
        match (a.as_ref(), b.as_ref()) {
            (FieldChange::Sequence(a), FieldChange::Sequence(b)) => Ok(FieldChange::Sequence(
                SequenceFieldHandler.compose(a, b, compose_child, cx)?,
            )),
            (FieldChange::Optional(a), FieldChange::Optional(b)) => Ok(FieldChange::Optional(
                OptionalFieldHandler.compose(a, b, compose_child, cx)?,
            )),
            (FieldChange::Generic(a), FieldChange::Generic(b)) => Ok(FieldChange::Generic(
                GenericFieldHandler.compose(a, b, compose_child, cx)?,
            )),
            (a, b) => Err(mismatch(a, b)),
        }
    }

    pub fn invert(&self, is_rollback: bool, cx: &mut FieldContext<'_>) -> Result<FieldChange> {
        Ok(match self {
            FieldChange::Sequence(c) => {
                FieldChange::Sequence(SequenceFieldHandler.invert(c, is_rollback, cx)?)
            }
            FieldChange::Optional(c) => {
                FieldChange::Optional(OptionalFieldHandler.invert(c, is_rollback, cx)?)
            }
            FieldChange::Generic(c) => {
                FieldChange::Generic(GenericFieldHandler.invert(c, is_rollback, cx)?)
            }
        })
    }

    pub fn rebase(
        &self,
        over: &FieldChange,
        rebase_child: RebaseChild<'_>,
        cx: &mut FieldContext<'_>,
        existence: NodeExistenceState,
    ) -> Result<FieldChange> {
        let (change, over) = align_kinds(self, over)?;
        match (change.as_ref(), over.as_ref()) {
            (FieldChange::Sequence(c), FieldChange::Sequence(o)) => Ok(FieldChange::Sequence(
                SequenceFieldHandler.rebase(c, o, rebase_child, cx, existence)?,
            )),
            (FieldChange::Optional(c), FieldChange::Optional(o)) => Ok(FieldChange::Optional(
                OptionalFieldHandler.rebase(c, o, rebase_child, cx, existence)?,
            )),
            (FieldChange::Generic(c), FieldChange::Generic(o)) => Ok(FieldChange::Generic(
                GenericFieldHandler.rebase(c, o, rebase_child, cx, existence)?,
            )),
            (a, b) => Err(mismatch(a, b)),
        }
    }

    pub fn prune(&self, prune_child: PruneChild<'_>) -> Result<FieldChange> {
        Ok(match self {
            FieldChange::Sequence(c) => FieldChange::Sequence(SequenceFieldHandler.prune(c, prune_child)?),
            FieldChange::Optional(c) => FieldChange::Optional(OptionalFieldHandler.prune(c, prune_child)?),
            FieldChange::Generic(c) => FieldChange::Generic(GenericFieldHandler.prune(c, prune_child)?),
        })
    }

    pub fn relevant_removed_roots(&self, from_child: ChildRemovedRoots<'_>) -> Result<Vec<DetachedNodeId>> {
        match self {
            FieldChange::Sequence(c) => SequenceFieldHandler.relevant_removed_roots(c, from_child),
            FieldChange::Optional(c) => OptionalFieldHandler.relevant_removed_roots(c, from_child),
            FieldChange::Generic(c) => GenericFieldHandler.relevant_removed_roots(c, from_child),
        }
    }

    pub fn cross_field_keys(&self) -> Vec<CrossFieldKeyRange> {
        match self {
            FieldChange::Sequence(c) => SequenceFieldHandler.cross_field_keys(c),
            FieldChange::Optional(c) => OptionalFieldHandler.cross_field_keys(c),
            FieldChange::Generic(c) => GenericFieldHandler.cross_field_keys(c),
        }
    }

    pub fn nested_changes(&self) -> Vec<NodeId> {
        match self {
            FieldChange::Sequence(c) => SequenceFieldHandler.nested_changes(c),
            FieldChange::Optional(c) => OptionalFieldHandler.nested_changes(c),
            FieldChange::Generic(c) => GenericFieldHandler.nested_changes(c),
        }
    }

    pub fn replace_revisions(&self, replacer: &RevisionReplacer) -> FieldChange {
        match self {
            FieldChange::Sequence(c) => FieldChange::Sequence(SequenceFieldHandler.replace_revisions(c, replacer)),
            FieldChange::Optional(c) => FieldChange::Optional(OptionalFieldHandler.replace_revisions(c, replacer)),
            FieldChange::Generic(c) => FieldChange::Generic(GenericFieldHandler.replace_revisions(c, replacer)),
        }
    }

    pub fn into_delta(&self, child_delta: ChildDelta<'_>) -> Result<DeltaFieldChanges> {
        match self {
            FieldChange::Sequence(c) => SequenceFieldHandler.into_delta(c, child_delta),
            FieldChange::Optional(c) => OptionalFieldHandler.into_delta(c, child_delta),
            FieldChange::Generic(c) => GenericFieldHandler.into_delta(c, child_delta),
        }
    }
}

fn mismatch(a: &FieldChange, b: &FieldChange) -> ChangesetError {
    ChangesetError::FieldKindMismatch {
        expected: a.kind(),
        found: b.kind(),
    }
}

/// Brings two changes to a common kind. Generic changes only carry child
/// changes, so they convert to any kind.
fn align_kinds<'c>(
    a: &'c FieldChange,
    b: &'c FieldChange,
) -> Result<(Cow<'c, FieldChange>, Cow<'c, FieldChange>)> {
    if a.kind() == b.kind() {
        return Ok((Cow::Borrowed(a), Cow::Borrowed(b)));
    }
    match (a, b) {
        (FieldChange::Generic(g), other) => Ok((
            Cow::Owned(FieldChange::with_child_changes(other.kind(), &g.children())?),
            Cow::Borrowed(b),
        )),
        (other, FieldChange::Generic(g)) => Ok((
            Cow::Borrowed(a),
            Cow::Owned(FieldChange::with_child_changes(other.kind(), &g.children())?),
        )),
        _ => Err(mismatch(a, b)),
    }
}
