//! Inversion of a mark list.
//!
//! Rollbacks reuse the original ids so that composing a change with its
//! rollback cancels exactly. Other inverses take fresh ids. The two ends of
//! a move must agree on theirs, so move ids come from the block the modular
//! layer reserved before inverting any field.

use crate::cross_field::CrossFieldTarget;
use crate::error::{ChangesetError, Result};
use crate::field_kinds::FieldContext;
use crate::ids::{ChangeAtomId, NodeId};

use super::format::{Attach, CellId, Detach, Mark, MarkEffect, MarkList};
use super::move_effects::{get_move_effect, set_move_effect, MoveEffect};
use super::utils::{attach_source, split_mark, MarkListBuilder};

pub(super) fn invert(change: &[Mark], is_rollback: bool, cx: &mut FieldContext<'_>) -> Result<MarkList> {
    let mut out = MarkListBuilder::new();
    let mut pending: Vec<Mark> = change.iter().rev().cloned().collect();
    while let Some(mark) = pending.pop() {
        let (mark, moved_changes) = match mark.effect.attach().filter(|a| a.is_move()).copied() {
            Some(attach) => {
                let (effect, length) =
                    get_move_effect(cx.cross_field, CrossFieldTarget::Destination, attach.id(), mark.count);
                let mark = if length < mark.count {
                    let (head, tail) = split_mark(&mark, length)?;
                    pending.push(tail);
                    head
                } else {
                    mark
                };
                (mark, effect.and_then(|e| e.moved_changes))
            }
            None => (mark, None),
        };
        out.push(invert_mark(mark, moved_changes, is_rollback, cx)?);
    }
    Ok(out.build())
}

fn invert_mark(
    mark: Mark,
    moved_changes: Option<NodeId>,
    is_rollback: bool,
    cx: &mut FieldContext<'_>,
) -> Result<Mark> {
    let count = mark.count;
    Ok(match mark.effect {
        MarkEffect::Noop => mark,
        MarkEffect::Attach(attach) => Mark {
            count,
            cell_id: None,
            changes: if attach.is_move() { moved_changes } else { mark.changes },
            effect: MarkEffect::Detach(invert_attach(&attach, mark.cell_id.as_ref(), count, is_rollback, cx)?),
        },
        MarkEffect::Detach(detach) => {
            let changes = deposit_changes(&detach, mark.changes, cx);
            Mark {
                count,
                cell_id: Some(CellId::new(detach.id())),
                changes,
                effect: MarkEffect::Attach(invert_detach(&detach, count, is_rollback, cx)?),
            }
        }
        MarkEffect::AttachAndDetach { attach, detach } => {
            let changes = deposit_changes(&detach, mark.changes, cx);
            let changes = if attach.is_move() { moved_changes } else { changes };
            Mark {
                count,
                cell_id: Some(CellId::new(detach.id())),
                changes,
                effect: MarkEffect::AttachAndDetach {
                    attach: invert_detach(&detach, count, is_rollback, cx)?,
                    detach: invert_attach(&attach, mark.cell_id.as_ref(), count, is_rollback, cx)?,
                },
            }
        }
    })
}

/// Nested changes on moved-out content travel to the inverse's detach,
/// which sits where the content was moved in.
fn deposit_changes(detach: &Detach, changes: Option<NodeId>, cx: &mut FieldContext<'_>) -> Option<NodeId> {
    if !detach.is_move() {
        return changes;
    }
    if let Some(changes) = changes {
        set_move_effect(
            cx.cross_field,
            CrossFieldTarget::Destination,
            detach.id(),
            1,
            MoveEffect::with_changes(changes),
        );
    }
    None
}

fn inverse_move_id(id: ChangeAtomId, is_rollback: bool, cx: &FieldContext<'_>) -> Result<ChangeAtomId> {
    if is_rollback {
        return Ok(id);
    }
    cx.inverse_move_ids
        .and_then(|ids| ids.get(id))
        .ok_or_else(|| ChangesetError::InvariantViolation(format!("no inverse id reserved for move {id}")))
}

fn fresh_id(count: u32, cx: &mut FieldContext<'_>) -> ChangeAtomId {
    ChangeAtomId::new(None, cx.id_allocator.allocate(count))
}

fn invert_attach(
    attach: &Attach,
    cell_id: Option<&CellId>,
    count: u32,
    is_rollback: bool,
    cx: &mut FieldContext<'_>,
) -> Result<Detach> {
    Ok(match attach {
        Attach::Insert(_) | Attach::Revive(_) => Detach::Delete(if is_rollback {
            attach_source(attach, cell_id)
        } else {
            fresh_id(count, cx)
        }),
        Attach::MoveIn(id) | Attach::ReturnTo(id) => Detach::ReturnFrom(inverse_move_id(*id, is_rollback, cx)?),
    })
}

fn invert_detach(detach: &Detach, count: u32, is_rollback: bool, cx: &mut FieldContext<'_>) -> Result<Attach> {
    Ok(match detach {
        Detach::Delete(id) => Attach::Revive(if is_rollback { *id } else { fresh_id(count, cx) }),
        Detach::MoveOut(id) | Detach::ReturnFrom(id) => Attach::ReturnTo(inverse_move_id(*id, is_rollback, cx)?),
    })
}
