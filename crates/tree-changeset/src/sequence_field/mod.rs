//! Sequence field kind: an ordered run of child nodes edited through marks.
//!
//! See [`format`] for the mark-list representation. The algebra lives in
//! [`compose`](self::compose), [`invert`](self::invert) and
//! [`rebase`](self::rebase); moves whose two ends are in different places
//! exchange information through the cross-field manager (see
//! [`move_effects`]).

pub mod editor;
pub mod format;
pub mod mark_queue;
pub mod move_effects;
pub mod utils;

mod compose;
mod into_delta;
mod invert;
mod rebase;

use crate::cross_field::{CrossFieldKeyRange, CrossFieldTarget};
use crate::delta::{DeltaFieldChanges, DetachedNodeId};
use crate::error::{ensure, Result};
use crate::field_kinds::{
    ChildDelta, ChildRemovedRoots, ComposeChild, FieldChangeHandler, FieldContext,
    FieldKindIdentifier, NodeExistenceState, PruneChild, RebaseChild,
};
use crate::ids::NodeId;
use crate::revision::RevisionReplacer;

pub use format::{Attach, CellId, Changeset, Detach, LineageEvent, Mark, MarkEffect, MarkList};
pub use move_effects::MoveEffect;

use utils::normalize;

#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceFieldHandler;

impl FieldChangeHandler for SequenceFieldHandler {
    type Changeset = MarkList;

    const KIND: FieldKindIdentifier = FieldKindIdentifier::Sequence;

    fn compose(
        &self,
        change1: &MarkList,
        change2: &MarkList,
        compose_child: ComposeChild<'_>,
        cx: &mut FieldContext<'_>,
    ) -> Result<MarkList> {
        compose::compose(change1, change2, compose_child, cx)
    }

    fn invert(&self, change: &MarkList, is_rollback: bool, cx: &mut FieldContext<'_>) -> Result<MarkList> {
        invert::invert(change, is_rollback, cx)
    }

    fn rebase(
        &self,
        change: &MarkList,
        over: &MarkList,
        rebase_child: RebaseChild<'_>,
        cx: &mut FieldContext<'_>,
        existence: NodeExistenceState,
    ) -> Result<MarkList> {
        rebase::rebase(change, over, rebase_child, cx, existence)
    }

    fn prune(&self, change: &MarkList, prune_child: PruneChild<'_>) -> Result<MarkList> {
        let mut marks = Vec::with_capacity(change.len());
        for mark in change {
            let changes = match mark.changes {
                Some(node) => prune_child(node)?,
                None => None,
            };
            marks.push(Mark { changes, ..mark.clone() });
        }
        Ok(normalize(marks))
    }

    fn is_empty(&self, change: &MarkList) -> bool {
        change
            .iter()
            .all(|m| m.changes.is_none() && matches!(m.effect, MarkEffect::Noop))
    }

    fn relevant_removed_roots(
        &self,
        change: &MarkList,
        from_child: ChildRemovedRoots<'_>,
    ) -> Result<Vec<DetachedNodeId>> {
        into_delta::relevant_removed_roots(change, from_child)
    }

    fn cross_field_keys(&self, change: &MarkList) -> Vec<CrossFieldKeyRange> {
        let mut keys = Vec::new();
        for mark in change {
            if let Some(detach) = mark.effect.detach().filter(|d| d.is_move()) {
                keys.push(CrossFieldKeyRange::new(CrossFieldTarget::Source, detach.id(), mark.count));
            }
            if let Some(attach) = mark.effect.attach().filter(|a| a.is_move()) {
                keys.push(CrossFieldKeyRange::new(
                    CrossFieldTarget::Destination,
                    attach.id(),
                    mark.count,
                ));
            }
        }
        keys
    }

    fn nested_changes(&self, change: &MarkList) -> Vec<NodeId> {
        change.iter().filter_map(|m| m.changes).collect()
    }

    fn replace_revisions(&self, change: &MarkList, replacer: &RevisionReplacer) -> MarkList {
        change
            .iter()
            .map(|mark| Mark {
                count: mark.count,
                cell_id: mark.cell_id.as_ref().map(|cell| CellId {
                    revision: replacer.revision(cell.revision),
                    local_id: cell.local_id,
                    lineage: cell
                        .lineage
                        .iter()
                        .map(|e| LineageEvent {
                            revision: replacer.revision(e.revision),
                            ..*e
                        })
                        .collect(),
                }),
                changes: mark.changes.map(|n| replacer.atom(n)),
                effect: match &mark.effect {
                    MarkEffect::Noop => MarkEffect::Noop,
                    MarkEffect::Attach(a) => MarkEffect::Attach(a.with_id(replacer.atom(a.id()))),
                    MarkEffect::Detach(d) => MarkEffect::Detach(d.with_id(replacer.atom(d.id()))),
                    MarkEffect::AttachAndDetach { attach, detach } => MarkEffect::AttachAndDetach {
                        attach: attach.with_id(replacer.atom(attach.id())),
                        detach: detach.with_id(replacer.atom(detach.id())),
                    },
                },
            })
            .collect()
    }

    fn into_delta(&self, change: &MarkList, child_delta: ChildDelta<'_>) -> Result<DeltaFieldChanges> {
        into_delta::into_delta(change, child_delta)
    }

    fn build_child_changes(&self, children: &[(usize, NodeId)]) -> Result<MarkList> {
        let mut sorted = children.to_vec();
        sorted.sort_by_key(|&(index, _)| index);
        let mut marks = Vec::with_capacity(sorted.len() * 2);
        let mut position = 0;
        for (index, node) in sorted {
            ensure!(index >= position, "two child changes at index {index}");
            marks.push(Mark::skip((index - position) as u32));
            marks.push(Mark::modify(node));
            position = index + 1;
        }
        Ok(normalize(marks))
    }
}
