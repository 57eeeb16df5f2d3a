//! Delta: the flat description of a change consumed by tree storage.
//!
//! A [`DeltaRoot`] lists, per field, runs of cells to skip, attach into or
//! detach from. Detached content is addressed by [`DetachedNodeId`]s;
//! `build` creates detached content, `destroy` discards it and `refreshers`
//! carries content the receiver may have already garbage-collected.

use indexmap::IndexMap;

use crate::ids::ChangeAtomId;
use crate::tree::{FieldKey, NodeContent};

pub type DetachedNodeId = ChangeAtomId;

pub type DeltaFieldMap = IndexMap<FieldKey, DeltaFieldChanges>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaRoot {
    pub fields: DeltaFieldMap,
    pub build: Vec<DeltaDetachedNodeBuild>,
    pub destroy: Vec<DeltaDetachedNodeDestruction>,
    pub refreshers: Vec<DeltaDetachedNodeBuild>,
}

impl DeltaRoot {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.build.is_empty()
            && self.destroy.is_empty()
            && self.refreshers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaFieldChanges {
    /// Marks over the cells of the field, in order.
    pub local: Vec<DeltaMark>,
    /// Changes to nodes that are detached throughout the change.
    pub global: Vec<DeltaDetachedNodeChanges>,
    /// Detached content that moves from one id to another.
    pub rename: Vec<DeltaDetachedNodeRename>,
}

impl DeltaFieldChanges {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.global.is_empty() && self.rename.is_empty()
    }

    /// Appends a mark, merging plain skips.
    pub fn push_mark(&mut self, mark: DeltaMark) {
        if mark.count == 0 {
            return;
        }
        if mark.is_skip() {
            if let Some(last) = self.local.last_mut() {
                if last.is_skip() {
                    last.count += mark.count;
                    return;
                }
            }
        }
        self.local.push(mark);
    }

    /// Drops trailing skips.
    pub fn finish(mut self) -> Self {
        while self.local.last().is_some_and(DeltaMark::is_skip) {
            self.local.pop();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMark {
    pub count: u32,
    pub attach: Option<DetachedNodeId>,
    pub detach: Option<DetachedNodeId>,
    pub fields: Option<DeltaFieldMap>,
}

impl DeltaMark {
    pub fn skip(count: u32) -> Self {
        Self {
            count,
            attach: None,
            detach: None,
            fields: None,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.attach.is_none() && self.detach.is_none() && self.fields.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaDetachedNodeChanges {
    pub id: DetachedNodeId,
    pub fields: DeltaFieldMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaDetachedNodeRename {
    pub count: u32,
    pub old_id: DetachedNodeId,
    pub new_id: DetachedNodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaDetachedNodeBuild {
    pub id: DetachedNodeId,
    pub trees: Vec<NodeContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaDetachedNodeDestruction {
    pub id: DetachedNodeId,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_merge_and_trailing_skips_drop() {
        let mut field = DeltaFieldChanges::default();
        field.push_mark(DeltaMark::skip(1));
        field.push_mark(DeltaMark::skip(2));
        field.push_mark(DeltaMark {
            count: 1,
            attach: None,
            detach: Some(ChangeAtomId::local(0)),
            fields: None,
        });
        field.push_mark(DeltaMark::skip(4));
        let field = field.finish();
        assert_eq!(field.local.len(), 2);
        assert_eq!(field.local[0], DeltaMark::skip(3));
    }
}
