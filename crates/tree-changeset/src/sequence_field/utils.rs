//! Helpers over marks: cell state, splitting, merging and cell ordering.

use std::cmp::Ordering;

use crate::error::{ensure, Result};
use crate::ids::{ChangeAtomId, ChangesetLocalId, RevisionTag};
use crate::revision::{compare_revision_age, RevisionMetadataSource};

use super::format::{Attach, CellId, LineageEvent, Mark, MarkEffect, MarkList};

pub fn output_cell_empty(mark: &Mark) -> bool {
    match mark.effect {
        MarkEffect::Noop => mark.cell_id.is_some(),
        MarkEffect::Attach(_) => false,
        MarkEffect::Detach(_) | MarkEffect::AttachAndDetach { .. } => true,
    }
}

/// Id of the cells in the output context, when they are empty there.
pub fn output_cell_id(mark: &Mark) -> Option<CellId> {
    match &mark.effect {
        MarkEffect::Noop => mark.cell_id.clone(),
        MarkEffect::Attach(_) => None,
        MarkEffect::Detach(detach) | MarkEffect::AttachAndDetach { detach, .. } => {
            Some(CellId::new(detach.id()))
        }
    }
}

/// Detached id the attached content comes from.
pub fn attach_source(attach: &Attach, cell_id: Option<&CellId>) -> ChangeAtomId {
    match attach {
        Attach::Revive(id) => cell_id.map_or(*id, CellId::atom),
        other => other.id(),
    }
}

/// An insert or move-in creating cells that exist in no other change.
pub fn is_fresh_attach(mark: &Mark) -> bool {
    match (&mark.effect, &mark.cell_id) {
        (MarkEffect::Attach(Attach::Insert(id) | Attach::MoveIn(id)), Some(cell)) => cell.atom() == *id,
        _ => false,
    }
}

/// Tombstone without nested changes: carries no information.
pub fn is_empty_tombstone(mark: &Mark) -> bool {
    matches!(mark.effect, MarkEffect::Noop) && mark.cell_id.is_some() && mark.changes.is_none()
}

fn is_plain_skip(mark: &Mark) -> bool {
    matches!(mark.effect, MarkEffect::Noop) && mark.cell_id.is_none() && mark.changes.is_none()
}

/// Splits `mark` into its first `length` cells and the rest.
pub fn split_mark(mark: &Mark, length: u32) -> Result<(Mark, Mark)> {
    ensure!(
        length > 0 && length < mark.count,
        "cannot split a mark of {} cells at {length}",
        mark.count
    );
    ensure!(mark.changes.is_none(), "cannot split a mark carrying nested changes");
    let head = Mark {
        count: length,
        cell_id: mark.cell_id.clone(),
        changes: None,
        effect: mark.effect.clone(),
    };
    let tail = Mark {
        count: mark.count - length,
        cell_id: mark.cell_id.as_ref().map(|c| c.offset(length)),
        changes: None,
        effect: mark.effect.offset(length),
    };
    Ok((head, tail))
}

/// Extends `prev` with `next` when they describe one contiguous range.
pub fn try_merge(prev: &mut Mark, next: &Mark) -> bool {
    if prev.changes.is_some() || next.changes.is_some() {
        return false;
    }
    if prev.effect.offset(prev.count) != next.effect {
        return false;
    }
    let cells_continue = match (&prev.cell_id, &next.cell_id) {
        (None, None) => true,
        (Some(a), Some(b)) => a.offset(prev.count) == *b,
        _ => false,
    };
    if cells_continue {
        prev.count += next.count;
    }
    cells_continue
}

/// Accumulates marks in normal form.
#[derive(Debug, Default)]
pub struct MarkListBuilder {
    marks: MarkList,
}

impl MarkListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mark: Mark) {
        if mark.count == 0 || is_empty_tombstone(&mark) {
            return;
        }
        if let Some(last) = self.marks.last_mut() {
            if try_merge(last, &mark) {
                return;
            }
        }
        self.marks.push(mark);
    }

    pub fn push_skip(&mut self, count: u32) {
        self.push(Mark::skip(count));
    }

    pub fn build(mut self) -> MarkList {
        while self.marks.last().is_some_and(is_plain_skip) {
            self.marks.pop();
        }
        self.marks
    }
}

pub fn normalize(marks: impl IntoIterator<Item = Mark>) -> MarkList {
    let mut builder = MarkListBuilder::new();
    for mark in marks {
        builder.push(mark);
    }
    builder.build()
}

/// Relative order of two runs of empty cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    /// Both runs start at the same cell.
    Same,
    /// The base run (or only its first `n` cells) comes first.
    BaseFirst(Option<u32>),
    /// The new run (or only its first `n` cells) comes first.
    NewFirst(Option<u32>),
}

pub fn compare_cell_positions(
    base: &CellId,
    base_count: u32,
    new: &CellId,
    new_count: u32,
    new_is_fresh: bool,
    metadata: &dyn RevisionMetadataSource,
) -> CellOrder {
    if base.revision == new.revision {
        let (b, n) = (base.local_id.0, new.local_id.0);
        return match b.cmp(&n) {
            Ordering::Equal => CellOrder::Same,
            Ordering::Less => CellOrder::BaseFirst((n < b + base_count).then_some(n - b)),
            Ordering::Greater => CellOrder::NewFirst((b < n + new_count).then_some(b - n)),
        };
    }
    if let Some(pos) = lineage_position(&new.lineage, base.revision, base.local_id, base_count) {
        return match pos {
            0 => CellOrder::NewFirst(None),
            p if p >= base_count => CellOrder::BaseFirst(None),
            p => CellOrder::BaseFirst(Some(p)),
        };
    }
    if let Some(pos) = lineage_position(&base.lineage, new.revision, new.local_id, new_count) {
        return match pos {
            0 => CellOrder::BaseFirst(None),
            p if p >= new_count => CellOrder::NewFirst(None),
            p => CellOrder::NewFirst(Some(p)),
        };
    }
    if new_is_fresh {
        return CellOrder::NewFirst(None);
    }
    match compare_revision_age(metadata, base.revision, new.revision) {
        Ordering::Greater => CellOrder::NewFirst(None),
        _ => CellOrder::BaseFirst(None),
    }
}

/// Number of cells of `[start, start + count)` (emptied by `revision`) that
/// precede a cell with the given lineage.
fn lineage_position(
    lineage: &[LineageEvent],
    revision: Option<RevisionTag>,
    start: ChangesetLocalId,
    count: u32,
) -> Option<u32> {
    let event = lineage.iter().find(|e| e.revision == revision)?;
    let boundary = i64::from(event.id.0) + i64::from(event.offset);
    Some((boundary - i64::from(start.0)).clamp(0, i64::from(count)) as u32)
}
