//! Constructors for common sequence edits.
//!
//! Indices are positions among the full cells of the field's input context.

use crate::error::{ChangesetError, Result};
use crate::ids::{ChangeAtomId, NodeId};

use super::format::{CellId, Changeset, Mark};
use super::utils::normalize;

fn ensure_count(count: u32) -> Result<()> {
    if count == 0 {
        return Err(ChangesetError::InvalidEdit("edits must cover at least one node".into()));
    }
    Ok(())
}

fn to_count(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| ChangesetError::InvalidEdit(format!("index {index} out of range")))
}

/// Inserts `count` new nodes; the built content is keyed by `first_id`.
pub fn insert(index: usize, count: u32, first_id: ChangeAtomId) -> Result<Changeset> {
    ensure_count(count)?;
    Ok(normalize([Mark::skip(to_count(index)?), Mark::insert(count, first_id)]))
}

pub fn delete(index: usize, count: u32, id: ChangeAtomId) -> Result<Changeset> {
    ensure_count(count)?;
    Ok(normalize([Mark::skip(to_count(index)?), Mark::delete(count, id)]))
}

pub fn modify(index: usize, node: NodeId) -> Result<Changeset> {
    Ok(normalize([Mark::skip(to_count(index)?), Mark::modify(node)]))
}

/// Restores `count` nodes removed by `detached_by` into the cells they left.
pub fn revive(index: usize, count: u32, detached_by: ChangeAtomId, id: ChangeAtomId) -> Result<Changeset> {
    ensure_count(count)?;
    Ok(normalize([
        Mark::skip(to_count(index)?),
        Mark::revive(count, CellId::new(detached_by), id),
    ]))
}

/// Moves `count` nodes starting at `src` so they land before the node at `dst`.
pub fn move_nodes(src: usize, count: u32, dst: usize, id: ChangeAtomId) -> Result<Changeset> {
    ensure_count(count)?;
    let attach = Mark::move_in(count, id);
    let detach = Mark::move_out(count, id);
    layout_move(src, count, dst, attach, detach)
}

/// Moves `count` nodes starting at `src` back into the cells `detached_by`
/// emptied, which sit before the node at `dst`.
pub fn return_nodes(
    src: usize,
    count: u32,
    dst: usize,
    detached_by: CellId,
    id: ChangeAtomId,
) -> Result<Changeset> {
    ensure_count(count)?;
    let attach = Mark::return_to(count, detached_by, id);
    let detach = Mark::return_from(count, id);
    layout_move(src, count, dst, attach, detach)
}

fn layout_move(src: usize, count: u32, dst: usize, attach: Mark, detach: Mark) -> Result<Changeset> {
    let (src, dst) = (to_count(src)?, to_count(dst)?);
    if dst <= src {
        Ok(normalize([Mark::skip(dst), attach, Mark::skip(src - dst), detach]))
    } else if dst >= src + count {
        Ok(normalize([Mark::skip(src), detach, Mark::skip(dst - src - count), attach]))
    } else {
        Err(ChangesetError::InvalidEdit(format!(
            "cannot move nodes {src}..{} to {dst}, inside the moved range",
            src + count
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RevisionTag;

    #[test]
    fn insert_skips_to_index() {
        let id = ChangeAtomId::local(0);
        assert_eq!(insert(2, 3, id).unwrap(), vec![Mark::skip(2), Mark::insert(3, id)]);
        assert_eq!(insert(0, 1, id).unwrap(), vec![Mark::insert(1, id)]);
    }

    #[test]
    fn zero_count_is_rejected() {
        assert!(matches!(
            delete(0, 0, ChangeAtomId::local(0)),
            Err(ChangesetError::InvalidEdit(_))
        ));
    }

    #[test]
    fn move_layouts() {
        let id = ChangeAtomId::tagged(RevisionTag(1), 0);
        assert_eq!(
            move_nodes(0, 2, 3, id).unwrap(),
            vec![Mark::move_out(2, id), Mark::skip(1), Mark::move_in(2, id)]
        );
        assert_eq!(
            move_nodes(3, 1, 1, id).unwrap(),
            vec![Mark::skip(1), Mark::move_in(1, id), Mark::skip(2), Mark::move_out(1, id)]
        );
        assert!(move_nodes(1, 3, 2, id).is_err());
    }
}
