//! Mark-list representation of a sequence field changeset.
//!
//! # Format
//!
//! A changeset is a list of [`Mark`]s walking the cells of the field in
//! order. Each mark covers `count` consecutive cells:
//! - `cell_id: None`: the cells are full in the input context.
//! - `cell_id: Some(c)`: the cells are empty in the input context and were
//!   emptied (or created) by the change `c` identifies.
//!
//! The mark's [`MarkEffect`] says what happens to those cells. A mark that
//! carries nested `changes` always has `count == 1`.

use crate::ids::{ChangeAtomId, ChangesetLocalId, NodeId, RevisionTag};

pub type Changeset = MarkList;

pub type MarkList = Vec<Mark>;

/// Records where an empty cell sits relative to cells emptied by another
/// revision: after `offset` cells of the range `[id, id + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineageEvent {
    pub revision: Option<RevisionTag>,
    pub id: ChangesetLocalId,
    pub count: u32,
    pub offset: u32,
}

/// Identifies an empty cell by the change that emptied or created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellId {
    pub revision: Option<RevisionTag>,
    pub local_id: ChangesetLocalId,
    pub lineage: Vec<LineageEvent>,
}

impl CellId {
    pub fn new(atom: ChangeAtomId) -> Self {
        Self {
            revision: atom.revision,
            local_id: atom.local_id,
            lineage: Vec::new(),
        }
    }

    pub fn atom(&self) -> ChangeAtomId {
        ChangeAtomId::new(self.revision, self.local_id)
    }

    pub fn offset(&self, by: u32) -> Self {
        Self {
            revision: self.revision,
            local_id: self.local_id.offset(by),
            lineage: self.lineage.clone(),
        }
    }
}

impl From<ChangeAtomId> for CellId {
    fn from(atom: ChangeAtomId) -> Self {
        Self::new(atom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attach {
    /// Fills fresh cells with content built by the change.
    Insert(ChangeAtomId),
    /// Restores removed content into the cells it was removed from.
    Revive(ChangeAtomId),
    /// Destination of a move.
    MoveIn(ChangeAtomId),
    /// Destination of a move that returns nodes to cells they occupied.
    ReturnTo(ChangeAtomId),
}

impl Attach {
    pub fn id(&self) -> ChangeAtomId {
        match *self {
            Attach::Insert(id) | Attach::Revive(id) | Attach::MoveIn(id) | Attach::ReturnTo(id) => id,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Attach::MoveIn(_) | Attach::ReturnTo(_))
    }

    pub fn with_id(&self, id: ChangeAtomId) -> Self {
        match self {
            Attach::Insert(_) => Attach::Insert(id),
            Attach::Revive(_) => Attach::Revive(id),
            Attach::MoveIn(_) => Attach::MoveIn(id),
            Attach::ReturnTo(_) => Attach::ReturnTo(id),
        }
    }

    pub fn offset(&self, by: u32) -> Self {
        self.with_id(self.id().offset(by))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detach {
    Delete(ChangeAtomId),
    /// Source of a move.
    MoveOut(ChangeAtomId),
    /// Source of a move that returns nodes to cells they occupied.
    ReturnFrom(ChangeAtomId),
}

impl Detach {
    pub fn id(&self) -> ChangeAtomId {
        match *self {
            Detach::Delete(id) | Detach::MoveOut(id) | Detach::ReturnFrom(id) => id,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Detach::MoveOut(_) | Detach::ReturnFrom(_))
    }

    pub fn with_id(&self, id: ChangeAtomId) -> Self {
        match self {
            Detach::Delete(_) => Detach::Delete(id),
            Detach::MoveOut(_) => Detach::MoveOut(id),
            Detach::ReturnFrom(_) => Detach::ReturnFrom(id),
        }
    }

    pub fn offset(&self, by: u32) -> Self {
        self.with_id(self.id().offset(by))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkEffect {
    /// No structural change. On empty cells this is a tombstone.
    Noop,
    Attach(Attach),
    Detach(Detach),
    /// Content passes through initially empty cells: attached then detached.
    AttachAndDetach { attach: Attach, detach: Detach },
}

impl MarkEffect {
    pub fn attach(&self) -> Option<&Attach> {
        match self {
            MarkEffect::Attach(a) | MarkEffect::AttachAndDetach { attach: a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn detach(&self) -> Option<&Detach> {
        match self {
            MarkEffect::Detach(d) | MarkEffect::AttachAndDetach { detach: d, .. } => Some(d),
            _ => None,
        }
    }

    pub fn offset(&self, by: u32) -> Self {
        match self {
            MarkEffect::Noop => MarkEffect::Noop,
            MarkEffect::Attach(a) => MarkEffect::Attach(a.offset(by)),
            MarkEffect::Detach(d) => MarkEffect::Detach(d.offset(by)),
            MarkEffect::AttachAndDetach { attach, detach } => MarkEffect::AttachAndDetach {
                attach: attach.offset(by),
                detach: detach.offset(by),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub count: u32,
    pub cell_id: Option<CellId>,
    pub changes: Option<NodeId>,
    pub effect: MarkEffect,
}

impl Mark {
    fn with_effect(count: u32, effect: MarkEffect) -> Self {
        Self {
            count,
            cell_id: None,
            changes: None,
            effect,
        }
    }

    /// Leaves `count` full cells untouched.
    pub fn skip(count: u32) -> Self {
        Self::with_effect(count, MarkEffect::Noop)
    }

    pub fn modify(changes: NodeId) -> Self {
        Self {
            changes: Some(changes),
            ..Self::skip(1)
        }
    }

    pub fn tombstone(count: u32, cell_id: CellId) -> Self {
        Self {
            cell_id: Some(cell_id),
            ..Self::skip(count)
        }
    }

    pub fn insert(count: u32, id: ChangeAtomId) -> Self {
        Self {
            cell_id: Some(CellId::new(id)),
            ..Self::with_effect(count, MarkEffect::Attach(Attach::Insert(id)))
        }
    }

    pub fn delete(count: u32, id: ChangeAtomId) -> Self {
        Self::with_effect(count, MarkEffect::Detach(Detach::Delete(id)))
    }

    pub fn move_out(count: u32, id: ChangeAtomId) -> Self {
        Self::with_effect(count, MarkEffect::Detach(Detach::MoveOut(id)))
    }

    pub fn move_in(count: u32, id: ChangeAtomId) -> Self {
        Self {
            cell_id: Some(CellId::new(id)),
            ..Self::with_effect(count, MarkEffect::Attach(Attach::MoveIn(id)))
        }
    }

    pub fn revive(count: u32, cell_id: CellId, id: ChangeAtomId) -> Self {
        Self {
            cell_id: Some(cell_id),
            ..Self::with_effect(count, MarkEffect::Attach(Attach::Revive(id)))
        }
    }

    pub fn return_to(count: u32, cell_id: CellId, id: ChangeAtomId) -> Self {
        Self {
            cell_id: Some(cell_id),
            ..Self::with_effect(count, MarkEffect::Attach(Attach::ReturnTo(id)))
        }
    }

    pub fn return_from(count: u32, id: ChangeAtomId) -> Self {
        Self::with_effect(count, MarkEffect::Detach(Detach::ReturnFrom(id)))
    }

    pub fn with_changes(mut self, changes: NodeId) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_cell(mut self, cell_id: CellId) -> Self {
        self.cell_id = Some(cell_id);
        self
    }
}
