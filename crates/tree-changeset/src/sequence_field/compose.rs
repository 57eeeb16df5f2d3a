//! Sequential composition of two mark lists.
//!
//! The base list's output cells are aligned with the new list's input
//! cells. Nested changes the new list makes to nodes the base moved are
//! sent to the move's source through the cross-field manager, so that the
//! composed list describes them where the nodes start out.

use crate::cross_field::CrossFieldTarget;
use crate::error::{fail, ChangesetError, Result};
use crate::field_kinds::{ComposeChild, FieldContext};
use crate::ids::NodeId;

use super::format::{Attach, Detach, Mark, MarkEffect, MarkList};
use super::mark_queue::{MarkPairQueue, QueueMode};
use super::move_effects::{get_move_effect, set_move_effect, MoveEffect};
use super::utils::{attach_source, output_cell_empty, MarkListBuilder};

/// What the other ends of moves told us about the current pair.
#[derive(Debug, Default)]
struct PairEffects {
    moved_changes: Option<NodeId>,
    attach_cancelled: bool,
}

pub(super) fn compose(
    base: &[Mark],
    new: &[Mark],
    compose_child: ComposeChild<'_>,
    cx: &mut FieldContext<'_>,
) -> Result<MarkList> {
    let metadata = cx.metadata;
    let mut queue = MarkPairQueue::new(base, new, QueueMode::Compose, metadata);
    let mut out = MarkListBuilder::new();
    while !queue.is_empty() {
        let (base_mark, new_mark) = queue.pop()?;
        let (base_mark, new_mark, effects) = read_move_effects(&mut queue, base_mark, new_mark, cx)?;
        let composed = match (base_mark, new_mark) {
            (Some(b), None) => compose_base_only(b, effects, compose_child, cx)?,
            (None, Some(n)) => compose_new_only(n, compose_child)?,
            (Some(b), Some(n)) => compose_pair(b, n, effects, compose_child, cx)?,
            (None, None) => fail!("compose queue yielded no marks"),
        };
        out.push(composed);
    }
    Ok(out.build())
}

/// Looks up what the other end of the base mark's moves recorded, cutting
/// the pair where the recorded ranges end.
fn read_move_effects(
    queue: &mut MarkPairQueue<'_>,
    base: Option<Mark>,
    new: Option<Mark>,
    cx: &mut FieldContext<'_>,
) -> Result<(Option<Mark>, Option<Mark>, PairEffects)> {
    let Some(b) = base.as_ref() else {
        return Ok((base, new, PairEffects::default()));
    };
    let mut length = b.count;
    let mut effects = PairEffects::default();
    if let Some(detach) = b.effect.detach().filter(|d| d.is_move()) {
        let (effect, len) = get_move_effect(cx.cross_field, CrossFieldTarget::Source, detach.id(), length);
        length = length.min(len);
        effects.moved_changes = effect.and_then(|e| e.moved_changes);
    }
    let new_detaches_by_move = new
        .as_ref()
        .and_then(|n| n.effect.detach())
        .is_some_and(Detach::is_move);
    if let Some(attach) = b.effect.attach().filter(|a| a.is_move()) {
        if new_detaches_by_move {
            let (effect, len) =
                get_move_effect(cx.cross_field, CrossFieldTarget::Destination, attach.id(), length);
            length = length.min(len);
            effects.attach_cancelled = effect.is_some_and(|e| e.cancelled);
        }
    }
    let (base, new) = queue.truncate(base, new, length)?;
    Ok((base, new, effects))
}

fn compose_base_only(
    base: Mark,
    effects: PairEffects,
    compose_child: ComposeChild<'_>,
    cx: &mut FieldContext<'_>,
) -> Result<Mark> {
    let base_attach = base.effect.attach().copied();
    let effect = base.effect.clone();
    let cell_id = base.cell_id.clone();
    let changes = attach_changes(base_attach, base.changes, effects.moved_changes, compose_child, cx)?;
    Ok(Mark {
        count: base.count,
        cell_id,
        changes,
        effect,
    })
}

fn compose_new_only(new: Mark, compose_child: ComposeChild<'_>) -> Result<Mark> {
    let changes = match new.changes {
        Some(changes) => Some(compose_child(None, Some(changes))?),
        None => None,
    };
    Ok(Mark { changes, ..new })
}

fn compose_pair(
    base: Mark,
    new: Mark,
    effects: PairEffects,
    compose_child: ComposeChild<'_>,
    cx: &mut FieldContext<'_>,
) -> Result<Mark> {
    let new_changes = match (new.changes, effects.moved_changes) {
        (Some(_), Some(_)) => fail!("nested changes reach a cell from two places"),
        (a, b) => a.or(b),
    };

    let (effect, cell_id) = if !output_cell_empty(&base) {
        match (&base.effect, &new.effect) {
            (_, MarkEffect::Attach(_) | MarkEffect::AttachAndDetach { .. }) => {
                fail!("attach into cells that are already full")
            }
            (MarkEffect::Noop, effect) => (effect.clone(), base.cell_id.clone()),
            (MarkEffect::Attach(_), MarkEffect::Noop) => (base.effect.clone(), base.cell_id.clone()),
            (MarkEffect::Attach(attach), MarkEffect::Detach(detach)) => {
                let source = attach_source(attach, base.cell_id.as_ref());
                let undone = source == detach.id()
                    || (attach.is_move() && detach.is_move() && effects.attach_cancelled);
                if undone {
                    (MarkEffect::Noop, base.cell_id.clone())
                } else {
                    (
                        MarkEffect::AttachAndDetach {
                            attach: *attach,
                            detach: *detach,
                        },
                        base.cell_id.clone(),
                    )
                }
            }
            _ => fail!("base mark with empty output treated as full"),
        }
    } else {
        match (&base.effect, &new.effect) {
            (_, MarkEffect::Detach(_)) => fail!("detach of cells that are already empty"),
            (MarkEffect::Attach(_), _) => fail!("base attach treated as empty"),
            (MarkEffect::Noop, effect) => {
                if base.changes.is_some() && effect.attach().is_some_and(Attach::is_move) {
                    return Err(ChangesetError::Unsupported(
                        "moving detached nodes that carry earlier changes",
                    ));
                }
                (effect.clone(), base.cell_id.clone())
            }
            (MarkEffect::Detach(_) | MarkEffect::AttachAndDetach { .. }, MarkEffect::Noop) => {
                (base.effect.clone(), base.cell_id.clone())
            }
            (MarkEffect::Detach(detach), MarkEffect::Attach(attach)) => {
                cancel_detach(detach, attach, base.count, cx)?;
                (MarkEffect::Noop, base.cell_id.clone())
            }
            (
                MarkEffect::Detach(detach),
                MarkEffect::AttachAndDetach {
                    attach,
                    detach: redetach,
                },
            ) => {
                cancel_detach(detach, attach, base.count, cx)?;
                (MarkEffect::Detach(*redetach), base.cell_id.clone())
            }
            (MarkEffect::AttachAndDetach { attach, detach }, MarkEffect::Attach(returned)) => {
                cancel_detach(detach, returned, base.count, cx)?;
                (MarkEffect::Attach(*attach), base.cell_id.clone())
            }
            (
                MarkEffect::AttachAndDetach { attach, detach },
                MarkEffect::AttachAndDetach {
                    attach: returned,
                    detach: redetach,
                },
            ) => {
                cancel_detach(detach, returned, base.count, cx)?;
                (
                    MarkEffect::AttachAndDetach {
                        attach: *attach,
                        detach: *redetach,
                    },
                    base.cell_id.clone(),
                )
            }
        }
    };

    let changes = attach_changes(
        base.effect.attach().copied(),
        base.changes,
        new_changes,
        compose_child,
        cx,
    )?;
    Ok(Mark {
        count: base.count,
        cell_id,
        changes,
        effect,
    })
}

/// The new change re-attaches content the base detached: the detach is
/// undone. A move's other end learns that it no longer happens.
fn cancel_detach(detach: &Detach, attach: &Attach, count: u32, cx: &mut FieldContext<'_>) -> Result<()> {
    match (detach, attach) {
        (Detach::Delete(_), Attach::Revive(_)) => Ok(()),
        (Detach::MoveOut(id) | Detach::ReturnFrom(id), Attach::ReturnTo(_)) => {
            set_move_effect(
                cx.cross_field,
                CrossFieldTarget::Destination,
                *id,
                count,
                MoveEffect::cancelled(),
            );
            Ok(())
        }
        _ => Err(ChangesetError::Unsupported(
            "re-attaching with a different kind of attach than the detach",
        )),
    }
}

/// New changes to content the base attached by a move belong at the move's
/// source; everything else composes in place.
fn attach_changes(
    base_attach: Option<Attach>,
    base_changes: Option<NodeId>,
    new_changes: Option<NodeId>,
    compose_child: ComposeChild<'_>,
    cx: &mut FieldContext<'_>,
) -> Result<Option<NodeId>> {
    let new_changes = match base_attach.filter(Attach::is_move) {
        Some(attach) => {
            if let Some(changes) = new_changes {
                set_move_effect(
                    cx.cross_field,
                    CrossFieldTarget::Source,
                    attach.id(),
                    1,
                    MoveEffect::with_changes(changes),
                );
            }
            None
        }
        None => new_changes,
    };
    match (base_changes, new_changes) {
        (None, None) => Ok(None),
        (b, n) => Ok(Some(compose_child(b, n)?)),
    }
}
