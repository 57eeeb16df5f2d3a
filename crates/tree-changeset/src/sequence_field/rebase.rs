//! Rebasing a mark list over a concurrent one.
//!
//! Both lists share an input context. Marks of the new list are carried
//! over to the base's output context: cells the base emptied turn into
//! tombstones, cells the base filled are skipped, and effects on content the
//! base moved follow that content to its destination.

use crate::cross_field::CrossFieldTarget;
use crate::error::{fail, ChangesetError, Result};
use crate::field_kinds::{FieldContext, NodeExistenceState, RebaseChild};
use crate::ids::{ChangeAtomId, NodeId};

use super::format::{Attach, CellId, Detach, LineageEvent, Mark, MarkEffect, MarkList};
use super::mark_queue::{MarkPairQueue, QueueMode};
use super::move_effects::{get_move_effect, set_move_effect, MoveEffect};
use super::utils::normalize;

/// Effects recorded for the current pair by the other ends of moves.
#[derive(Debug, Default)]
struct RebaseEffects {
    /// Sent by the source of the base's move: what follows the moved content.
    moved_changes: Option<NodeId>,
    moved_detach: Option<Detach>,
    /// The new list's move lost its content to a base delete.
    new_attach_cancelled: bool,
}

/// Adds lineage to new marks on empty cells that sit among cells the base
/// emptied, so their order survives once those cells are forgotten.
#[derive(Debug, Default)]
struct LineageTracker {
    run: Option<(ChangeAtomId, u32)>,
    recipients: Vec<(usize, u32)>,
}

impl LineageTracker {
    fn detached(&mut self, out: &mut [Mark], id: ChangeAtomId, count: u32) {
        match self.run {
            Some((start, len))
                if start.revision == id.revision && start.local_id.offset(len) == id.local_id =>
            {
                self.run = Some((start, len + count));
            }
            _ => {
                self.flush(out);
                self.run = Some((id, count));
            }
        }
    }

    fn recipient(&mut self, index: usize) {
        if let Some((_, len)) = self.run {
            self.recipients.push((index, len));
        }
    }

    fn flush(&mut self, out: &mut [Mark]) {
        let recipients = std::mem::take(&mut self.recipients);
        let Some((start, count)) = self.run.take() else {
            return;
        };
        for (index, offset) in recipients {
            let Some(cell) = out.get_mut(index).and_then(|m| m.cell_id.as_mut()) else {
                continue;
            };
            let known = cell.revision == start.revision
                || cell.lineage.iter().any(|e| e.revision == start.revision);
            if !known {
                cell.lineage.push(LineageEvent {
                    revision: start.revision,
                    id: start.local_id,
                    count,
                    offset,
                });
            }
        }
    }
}

struct Output {
    marks: Vec<Mark>,
    lineage: LineageTracker,
}

impl Output {
    fn push(&mut self, mark: Mark) {
        let has_cell = mark.cell_id.is_some();
        self.marks.push(mark);
        if has_cell {
            self.lineage.recipient(self.marks.len() - 1);
        }
    }

    fn detached(&mut self, id: ChangeAtomId, count: u32) {
        self.lineage.detached(&mut self.marks, id, count);
    }

    fn full_cells(&mut self) {
        self.lineage.flush(&mut self.marks);
    }
}

pub(super) fn rebase(
    change: &[Mark],
    over: &[Mark],
    rebase_child: RebaseChild<'_>,
    cx: &mut FieldContext<'_>,
    existence: NodeExistenceState,
) -> Result<MarkList> {
    let metadata = cx.metadata;
    let mut queue = MarkPairQueue::new(over, change, QueueMode::Rebase, metadata);
    let mut out = Output {
        marks: Vec::new(),
        lineage: LineageTracker::default(),
    };
    while !queue.is_empty() {
        let (base_mark, new_mark) = queue.pop()?;
        let (base_mark, new_mark, effects) = read_move_effects(&mut queue, base_mark, new_mark, cx)?;
        let new_mark = match new_mark {
            Some(n) if effects.new_attach_cancelled => Some(drop_cancelled_attach(n)?),
            other => other,
        };
        match (base_mark, new_mark) {
            (Some(b), None) => rebase_base_only(b, effects, &mut out, rebase_child, cx, existence)?,
            (None, Some(n)) => {
                if n.cell_id.is_none() {
                    out.full_cells();
                }
                let changes = child(rebase_child, n.changes, None, node_state(&n, existence))?;
                out.push(Mark { changes, ..n });
            }
            (Some(b), Some(n)) => rebase_pair(b, n, effects, &mut out, rebase_child, cx, existence)?,
            (None, None) => fail!("rebase queue yielded no marks"),
        }
    }
    out.full_cells();
    Ok(normalize(out.marks))
}

fn read_move_effects(
    queue: &mut MarkPairQueue<'_>,
    base: Option<Mark>,
    new: Option<Mark>,
    cx: &mut FieldContext<'_>,
) -> Result<(Option<Mark>, Option<Mark>, RebaseEffects)> {
    let mut length = match (&base, &new) {
        (Some(b), _) => b.count,
        (None, Some(n)) => n.count,
        (None, None) => return Ok((base, new, RebaseEffects::default())),
    };
    let mut effects = RebaseEffects::default();
    if let Some(attach) = base.as_ref().and_then(|b| b.effect.attach()).filter(|a| a.is_move()) {
        let (effect, len) =
            get_move_effect(cx.cross_field, CrossFieldTarget::Destination, attach.id(), length);
        length = length.min(len);
        if let Some(effect) = effect {
            effects.moved_changes = effect.moved_changes;
            effects.moved_detach = effect.moved_detach;
        }
    }
    if let Some(attach) = new.as_ref().and_then(|n| n.effect.attach()).filter(|a| a.is_move()) {
        let (effect, len) =
            get_move_effect(cx.cross_field, CrossFieldTarget::Destination, attach.id(), length);
        length = length.min(len);
        effects.new_attach_cancelled = effect.is_some_and(|e| e.cancelled);
    }
    let (base, new) = queue.truncate(base, new, length)?;
    Ok((base, new, effects))
}

/// The content a new move would attach no longer exists: the attach goes.
fn drop_cancelled_attach(mark: Mark) -> Result<Mark> {
    match mark.effect {
        MarkEffect::Attach(_) => Ok(Mark {
            effect: MarkEffect::Noop,
            ..mark
        }),
        MarkEffect::AttachAndDetach { .. } => Err(ChangesetError::Unsupported(
            "cancelled move through cells that are detached again",
        )),
        _ => Ok(mark),
    }
}

/// Content in cells that are empty and stay empty is not in the document.
fn node_state(mark: &Mark, existence: NodeExistenceState) -> NodeExistenceState {
    if mark.cell_id.is_some() && mark.effect.attach().is_none() {
        NodeExistenceState::Dead
    } else {
        existence
    }
}

fn child(
    rebase_child: RebaseChild<'_>,
    new: Option<NodeId>,
    base: Option<NodeId>,
    state: NodeExistenceState,
) -> Result<Option<NodeId>> {
    if new.is_none() && base.is_none() {
        return Ok(None);
    }
    rebase_child(new, base, state)
}

fn merge_changes(a: Option<NodeId>, b: Option<NodeId>) -> Result<Option<NodeId>> {
    match (a, b) {
        (Some(_), Some(_)) => fail!("nested changes reach a cell from two places"),
        (a, b) => Ok(a.or(b)),
    }
}

fn send_to_destination(cx: &mut FieldContext<'_>, id: ChangeAtomId, count: u32, effect: MoveEffect) {
    if effect != MoveEffect::default() {
        set_move_effect(cx.cross_field, CrossFieldTarget::Destination, id, count, effect);
    }
}

/// Content that moved in and was detached again: effects that followed it
/// here keep going.
fn forward_through_detach(
    detach: &Detach,
    count: u32,
    changes: Option<NodeId>,
    moved_detach: Option<Detach>,
    out: &mut Output,
    cx: &mut FieldContext<'_>,
) {
    if detach.is_move() {
        send_to_destination(
            cx,
            detach.id(),
            count,
            MoveEffect {
                moved_changes: changes,
                moved_detach,
                cancelled: false,
            },
        );
    } else if let Some(changes) = changes {
        out.push(Mark::tombstone(count, CellId::new(detach.id())).with_changes(changes));
    }
}

fn rebase_base_only(
    base: Mark,
    effects: RebaseEffects,
    out: &mut Output,
    rebase_child: RebaseChild<'_>,
    cx: &mut FieldContext<'_>,
    existence: NodeExistenceState,
) -> Result<()> {
    let count = base.count;
    match (&base.cell_id, &base.effect) {
        (None, MarkEffect::Noop) => {
            out.full_cells();
            match child(rebase_child, None, base.changes, existence)? {
                Some(changes) => out.push(Mark::modify(changes)),
                None => out.push(Mark::skip(count)),
            }
        }
        (None, MarkEffect::Detach(Detach::Delete(id))) => {
            out.detached(*id, count);
            if let Some(changes) = child(rebase_child, None, base.changes, NodeExistenceState::Dead)? {
                out.push(Mark::tombstone(count, CellId::new(*id)).with_changes(changes));
            }
        }
        (None, MarkEffect::Detach(detach)) => {
            out.detached(detach.id(), count);
            let changes = child(rebase_child, None, base.changes, existence)?;
            send_to_destination(cx, detach.id(), count, MoveEffect {
                moved_changes: changes,
                ..MoveEffect::default()
            });
        }
        (None, _) => fail!("attach into cells that are already full"),
        (Some(cell), MarkEffect::Noop) => {
            if let Some(changes) = child(rebase_child, None, base.changes, NodeExistenceState::Dead)? {
                out.push(Mark::tombstone(count, cell.clone()).with_changes(changes));
            }
        }
        (Some(_), MarkEffect::Attach(attach)) => {
            let own = child(rebase_child, None, base.changes, existence)?;
            let (effect, changes) = if attach.is_move() {
                (
                    effects.moved_detach.map_or(MarkEffect::Noop, MarkEffect::Detach),
                    merge_changes(own, effects.moved_changes)?,
                )
            } else {
                (MarkEffect::Noop, own)
            };
            out.push(Mark {
                count,
                cell_id: None,
                changes,
                effect,
            });
        }
        (Some(_), MarkEffect::Detach(_)) => fail!("detach of cells that are already empty"),
        (Some(_), MarkEffect::AttachAndDetach { attach, detach }) => {
            let own = child(rebase_child, None, base.changes, NodeExistenceState::Dead)?;
            let (changes, moved_detach) = if attach.is_move() {
                (merge_changes(own, effects.moved_changes)?, effects.moved_detach)
            } else {
                (own, None)
            };
            let moved_detach = moved_detach.filter(|_| detach.is_move());
            forward_through_detach(detach, count, changes, moved_detach, out, cx);
        }
    }
    Ok(())
}

fn rebase_pair(
    base: Mark,
    new: Mark,
    effects: RebaseEffects,
    out: &mut Output,
    rebase_child: RebaseChild<'_>,
    cx: &mut FieldContext<'_>,
    existence: NodeExistenceState,
) -> Result<()> {
    let count = base.count;
    if base.cell_id.is_none() {
        match &base.effect {
            MarkEffect::Noop => {
                out.full_cells();
                let changes = child(rebase_child, new.changes, base.changes, node_state(&new, existence))?;
                out.push(Mark { changes, ..new });
            }
            MarkEffect::Detach(Detach::Delete(id)) => {
                out.detached(*id, count);
                let changes = child(rebase_child, new.changes, base.changes, NodeExistenceState::Dead)?;
                if let Some(detach) = new.effect.detach().filter(|d| d.is_move()) {
                    send_to_destination(cx, detach.id(), count, MoveEffect::cancelled());
                }
                let mut tombstone = Mark::tombstone(count, CellId::new(*id));
                tombstone.changes = changes;
                out.push(tombstone);
            }
            MarkEffect::Detach(detach) => {
                out.detached(detach.id(), count);
                let changes = child(rebase_child, new.changes, base.changes, existence)?;
                send_to_destination(
                    cx,
                    detach.id(),
                    count,
                    MoveEffect {
                        moved_changes: changes,
                        moved_detach: new.effect.detach().copied(),
                        cancelled: false,
                    },
                );
            }
            _ => fail!("attach into cells that are already full"),
        }
        return Ok(());
    }

    match (&base.effect, &new.effect) {
        (_, MarkEffect::Detach(_)) | (MarkEffect::Detach(_), _) => {
            fail!("detach of cells that are already empty")
        }
        (MarkEffect::Noop, _) => {
            let changes = child(rebase_child, new.changes, base.changes, node_state(&new, existence))?;
            out.push(Mark { changes, ..new });
        }
        (MarkEffect::Attach(attach), new_effect) => {
            let own = child(rebase_child, new.changes, base.changes, existence)?;
            let (changes, moved_detach) = if attach.is_move() {
                (merge_changes(own, effects.moved_changes)?, effects.moved_detach)
            } else {
                (own, None)
            };
            let effect = match new_effect {
                MarkEffect::Noop => moved_detach.map_or(MarkEffect::Noop, MarkEffect::Detach),
                MarkEffect::Attach(revived) => match moved_detach {
                    Some(d) if d.is_move() && revived.is_move() && d.id() == revived.id() => MarkEffect::Noop,
                    Some(d) => MarkEffect::Detach(d),
                    None => MarkEffect::Noop,
                },
                MarkEffect::AttachAndDetach { attach: revived, detach } => {
                    if revived.is_move() {
                        return Err(ChangesetError::Unsupported(
                            "concurrent returns of the same content through a move",
                        ));
                    }
                    MarkEffect::Detach(*detach)
                }
                MarkEffect::Detach(_) => fail!("detach of cells that are already empty"),
            };
            out.push(Mark {
                count,
                cell_id: None,
                changes,
                effect,
            });
        }
        (MarkEffect::AttachAndDetach { attach, detach }, MarkEffect::Noop) => {
            let own = child(rebase_child, new.changes, base.changes, NodeExistenceState::Dead)?;
            let (changes, moved_detach) = if attach.is_move() {
                (merge_changes(own, effects.moved_changes)?, effects.moved_detach)
            } else {
                (own, None)
            };
            let moved_detach = moved_detach.filter(|_| detach.is_move());
            forward_through_detach(detach, count, changes, moved_detach, out, cx);
        }
        (MarkEffect::AttachAndDetach { detach, .. }, MarkEffect::Attach(revived @ Attach::Revive(_))) => {
            if detach.is_move() {
                return Err(ChangesetError::Unsupported("reviving content a concurrent change moved away"));
            }
            let changes = child(rebase_child, new.changes, base.changes, existence)?;
            out.push(Mark {
                count,
                cell_id: Some(CellId::new(detach.id())),
                changes,
                effect: MarkEffect::Attach(*revived),
            });
        }
        (
            MarkEffect::AttachAndDetach { detach, .. },
            MarkEffect::AttachAndDetach {
                attach: Attach::Revive(_),
                detach: redetach,
            },
        ) => {
            if detach.is_move() {
                return Err(ChangesetError::Unsupported("reviving content a concurrent change moved away"));
            }
            let changes = child(rebase_child, new.changes, base.changes, NodeExistenceState::Dead)?;
            if redetach.is_move() {
                send_to_destination(cx, redetach.id(), count, MoveEffect::cancelled());
            }
            let mut tombstone = Mark::tombstone(count, CellId::new(detach.id()));
            tombstone.changes = changes;
            out.push(tombstone);
        }
        (MarkEffect::AttachAndDetach { .. }, _) => {
            return Err(ChangesetError::Unsupported(
                "moving content that a concurrent change passed through",
            ))
        }
    }
    Ok(())
}
