//! Information exchanged between the two ends of a move.

use crate::cross_field::{CrossFieldManager, CrossFieldTarget, RangeValue};
use crate::ids::{ChangeAtomId, NodeId};

use super::format::Detach;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveEffect {
    /// Nested changes to carry to the other end. Only stored for single cells.
    pub moved_changes: Option<NodeId>,
    /// A detach to apply where the moved nodes end up.
    pub moved_detach: Option<Detach>,
    /// The move no longer happens.
    pub cancelled: bool,
}

impl MoveEffect {
    pub fn with_changes(changes: NodeId) -> Self {
        Self {
            moved_changes: Some(changes),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }
}

impl RangeValue for MoveEffect {
    fn offset_by(&self, offset: u32) -> Self {
        Self {
            moved_changes: if offset == 0 { self.moved_changes } else { None },
            moved_detach: self.moved_detach.map(|d| d.offset(offset)),
            cancelled: self.cancelled,
        }
    }
}

/// Reads the effect stored for the first cells of `[id, id + count)`.
/// Returns the effect (if any) and how many cells it covers.
pub(crate) fn get_move_effect(
    cross_field: &mut dyn CrossFieldManager<MoveEffect>,
    target: CrossFieldTarget,
    id: ChangeAtomId,
    count: u32,
) -> (Option<MoveEffect>, u32) {
    let found = cross_field.get(target, id.revision, id.local_id, count, true);
    (found.value, found.length.max(1).min(count))
}

pub(crate) fn set_move_effect(
    cross_field: &mut dyn CrossFieldManager<MoveEffect>,
    target: CrossFieldTarget,
    id: ChangeAtomId,
    count: u32,
    effect: MoveEffect,
) {
    cross_field.set(target, id.revision, id.local_id, count, effect, true);
}
