//! Building modular changesets from local edits.
//!
//! Edits are addressed by path. Ancestors of the edited field are reached
//! through generic field changes whose child nodes carry the edit; every id
//! the builder hands out comes from one allocator, so the untagged changes
//! it produces never reuse an id.

use std::collections::BTreeMap;

use tracing::trace;

use crate::delta::DetachedNodeId;
use crate::error::{ChangesetError, Result};
use crate::field_kinds::{FieldChange, GenericChangeset, OptionalChangeset};
use crate::ids::{ChangeAtomId, IdAllocator, NodeId};
use crate::revision::TaggedChange;
use crate::sequence_field::{editor, Changeset, Mark};
use crate::tree::{FieldUpPath, NodeContent, Reviver, UpPath};

use super::changeset::{FieldChangeMap, ModularChangeset, NodeChangeset, NodeExistsConstraint};
use super::ModularChangeFamily;

#[derive(Debug, Default)]
pub struct ModularEditBuilder {
    family: ModularChangeFamily,
    id_allocator: IdAllocator,
    changes: Vec<ModularChangeset>,
}

/// Field changes and nodes of one submission, before they become a
/// changeset.
#[derive(Default)]
struct Draft {
    fields: FieldChangeMap,
    nodes: BTreeMap<NodeId, NodeChangeset>,
    builds: BTreeMap<DetachedNodeId, Vec<NodeContent>>,
    refreshers: BTreeMap<DetachedNodeId, NodeContent>,
}

impl ModularEditBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(family: ModularChangeFamily) -> Self {
        Self {
            family,
            ..Self::default()
        }
    }

    /// Reserves `count` consecutive untagged ids and returns the first.
    pub fn generate_id(&mut self, count: u32) -> ChangeAtomId {
        ChangeAtomId::new(None, self.id_allocator.allocate(count))
    }

    /// Submits a change that only creates detached content.
    pub fn build_trees(&mut self, first_id: ChangeAtomId, trees: Vec<NodeContent>) -> Result<()> {
        if trees.is_empty() {
            return Err(ChangesetError::InvalidEdit("no trees to build".into()));
        }
        let mut draft = Draft::default();
        draft.builds.insert(first_id, trees);
        self.submit(draft)
    }

    pub fn submit_change(&mut self, field: &FieldUpPath, change: FieldChange) -> Result<()> {
        self.submit_changes(vec![(field.clone(), change)])
    }

    /// Submits changes to several fields as a single edit. Each field may
    /// appear once.
    pub fn submit_changes(&mut self, edits: Vec<(FieldUpPath, FieldChange)>) -> Result<()> {
        let mut draft = Draft::default();
        for (field, change) in edits {
            self.place(&mut draft, &field, change)?;
        }
        self.submit(draft)
    }

    /// Makes the edit conditional on the node at `path` still existing.
    pub fn add_node_exists_constraint(&mut self, path: &UpPath) -> Result<()> {
        let mut draft = Draft::default();
        let node = self.node_at(&mut draft, path)?;
        if let Some(entry) = draft.nodes.get_mut(&node) {
            entry.node_exists_constraint = Some(NodeExistsConstraint::default());
        }
        self.submit(draft)
    }

    pub fn sequence_insert(&mut self, field: &FieldUpPath, index: usize, content: Vec<NodeContent>) -> Result<()> {
        let count = content_len(&content)?;
        let id = self.generate_id(count);
        let mut draft = Draft::default();
        draft.builds.insert(id, content);
        self.place(&mut draft, field, FieldChange::Sequence(editor::insert(index, count, id)?))?;
        self.submit(draft)
    }

    pub fn sequence_delete(&mut self, field: &FieldUpPath, index: usize, count: u32) -> Result<()> {
        let id = self.generate_id(count);
        self.submit_change(field, FieldChange::Sequence(editor::delete(index, count, id)?))
    }

    /// Moves `count` nodes starting at `src` to before the node currently at
    /// `dst`, inside one field.
    pub fn sequence_move(&mut self, field: &FieldUpPath, src: usize, count: u32, dst: usize) -> Result<()> {
        let id = self.generate_id(count);
        self.submit_change(field, FieldChange::Sequence(editor::move_nodes(src, count, dst, id)?))
    }

    /// Moves nodes from one sequence field to another.
    pub fn move_across_fields(
        &mut self,
        src_field: &FieldUpPath,
        src_index: usize,
        count: u32,
        dst_field: &FieldUpPath,
        dst_index: usize,
    ) -> Result<()> {
        if src_field == dst_field {
            return self.sequence_move(src_field, src_index, count, dst_index);
        }
        if count == 0 {
            return Err(ChangesetError::InvalidEdit("moving zero nodes".into()));
        }
        let id = self.generate_id(count);
        self.submit_changes(vec![
            (src_field.clone(), FieldChange::Sequence(at(src_index, Mark::move_out(count, id)))),
            (dst_field.clone(), FieldChange::Sequence(at(dst_index, Mark::move_in(count, id)))),
        ])
    }

    /// Restores nodes removed by `detached_by`, fetching their content from
    /// `reviver` so the change carries it as refreshers.
    pub fn revive(
        &mut self,
        field: &FieldUpPath,
        index: usize,
        count: u32,
        detached_by: ChangeAtomId,
        reviver: &dyn Reviver,
    ) -> Result<()> {
        let Some(revision) = detached_by.revision else {
            return Err(ChangesetError::InvalidEdit("reviving nodes of an untagged change".into()));
        };
        let content = reviver.revive(revision, detached_by.local_id, count);
        if content.len() != count as usize {
            return Err(ChangesetError::InvalidEdit(format!(
                "reviver returned {} nodes, expected {count}",
                content.len()
            )));
        }
        let id = self.generate_id(count);
        let mut draft = Draft::default();
        for (offset, tree) in (0..count).zip(content) {
            draft.refreshers.insert(detached_by.offset(offset), tree);
        }
        let change = editor::revive(index, count, detached_by, id)?;
        self.place(&mut draft, field, FieldChange::Sequence(change))?;
        self.submit(draft)
    }

    /// Fills an optional field with new content.
    pub fn optional_set(&mut self, field: &FieldUpPath, content: NodeContent, was_empty: bool) -> Result<()> {
        let src = self.generate_id(1);
        let dst = self.generate_id(1);
        let mut draft = Draft::default();
        draft.builds.insert(src, vec![content]);
        self.place(&mut draft, field, FieldChange::Optional(OptionalChangeset::set(was_empty, src, dst)))?;
        self.submit(draft)
    }

    pub fn optional_clear(&mut self, field: &FieldUpPath, was_empty: bool) -> Result<()> {
        let dst = self.generate_id(1);
        self.submit_change(field, FieldChange::Optional(OptionalChangeset::clear(was_empty, dst)))
    }

    /// Composes everything submitted so far into one untagged change and
    /// starts over.
    pub fn take_change(&mut self) -> Result<ModularChangeset> {
        let changes: Vec<_> = std::mem::take(&mut self.changes)
            .into_iter()
            .map(TaggedChange::untagged)
            .collect();
        trace!(edits = changes.len(), "taking built change");
        let composed = self.family.compose(&changes)?;
        let max_id = composed.max_id.max(self.id_allocator.max_id());
        Ok(composed.with_max_id(max_id))
    }

    fn submit(&mut self, draft: Draft) -> Result<()> {
        let mut change = ModularChangeset::new(draft.fields, draft.nodes)?.with_max_id(self.id_allocator.max_id());
        change.builds = draft.builds;
        change.refreshers = draft.refreshers;
        self.changes.push(change);
        Ok(())
    }

    /// Inserts `change` at `field`, creating the ancestors it needs.
    fn place(&mut self, draft: &mut Draft, field: &FieldUpPath, change: FieldChange) -> Result<()> {
        let owner = match &field.parent {
            Some(parent) => Some(self.node_at(draft, parent)?),
            None => None,
        };
        let map = field_map_mut(draft, owner)?;
        if map.contains_key(&field.field) {
            return Err(ChangesetError::InvalidEdit(format!("field {} edited twice", field.field)));
        }
        map.insert(field.field.clone(), change);
        Ok(())
    }

    /// The draft node holding changes for the node at `path`.
    fn node_at(&mut self, draft: &mut Draft, path: &UpPath) -> Result<NodeId> {
        let owner = match &path.parent {
            Some(parent) => Some(self.node_at(draft, parent)?),
            None => None,
        };
        let existing = match field_map_mut(draft, owner)?.get(&path.parent_field) {
            None => None,
            Some(FieldChange::Generic(generic)) => generic.get(path.parent_index),
            Some(other) => {
                return Err(ChangesetError::InvalidEdit(format!(
                    "field {} already carries a {} change",
                    path.parent_field,
                    other.kind()
                )))
            }
        };
        if let Some(node) = existing {
            return Ok(node);
        }
        let node = self.generate_id(1);
        draft.nodes.insert(node, NodeChangeset::default());
        let entry = field_map_mut(draft, owner)?
            .entry(path.parent_field.clone())
            .or_insert_with(|| FieldChange::Generic(GenericChangeset::new()));
        if let FieldChange::Generic(generic) = entry {
            generic.insert(path.parent_index, node);
        }
        Ok(node)
    }
}

fn field_map_mut(draft: &mut Draft, owner: Option<NodeId>) -> Result<&mut FieldChangeMap> {
    match owner {
        None => Ok(&mut draft.fields),
        Some(node) => Ok(draft
            .nodes
            .get_mut(&node)
            .ok_or(ChangesetError::UnknownNode(node))?
            .field_changes
            .get_or_insert_with(FieldChangeMap::new)),
    }
}

fn content_len(content: &[NodeContent]) -> Result<u32> {
    match content.len() {
        0 => Err(ChangesetError::InvalidEdit("inserting no content".into())),
        len => u32::try_from(len).map_err(|_| ChangesetError::InvalidEdit(format!("{len} nodes in one insert"))),
    }
}

/// A single mark at `index`.
fn at(index: usize, mark: Mark) -> Changeset {
    let mut marks = Vec::with_capacity(2);
    if index > 0 {
        marks.push(Mark::skip(index as u32));
    }
    marks.push(mark);
    marks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ChangesetLocalId, RevisionTag};
    use crate::tree::FieldKey;
    use serde_json::json;

    #[test]
    fn nested_edit_is_wrapped_in_generic_ancestors() {
        let mut builder = ModularEditBuilder::new();
        let path = FieldUpPath::under(UpPath::root_child("items", 2), "tags");
        builder.sequence_delete(&path, 0, 1).unwrap();
        let change = builder.take_change().unwrap();
        let FieldChange::Generic(generic) = &change.field_changes[&FieldKey::from("items")] else {
            panic!("expected a generic ancestor");
        };
        let node = generic.get(2).unwrap();
        let fields = change.node_changes[&node].field_changes.as_ref().unwrap();
        assert!(matches!(fields[&FieldKey::from("tags")], FieldChange::Sequence(_)));
    }

    #[test]
    fn cross_field_move_shares_one_id() {
        let mut builder = ModularEditBuilder::new();
        builder
            .move_across_fields(&FieldUpPath::root("a"), 1, 2, &FieldUpPath::root("b"), 0)
            .unwrap();
        let change = builder.take_change().unwrap();
        let id = ChangeAtomId::local(0);
        assert_eq!(
            change.field_changes[&FieldKey::from("a")],
            FieldChange::Sequence(vec![Mark::skip(1), Mark::move_out(2, id)])
        );
        assert_eq!(
            change.field_changes[&FieldKey::from("b")],
            FieldChange::Sequence(vec![Mark::move_in(2, id)])
        );
        assert_eq!(change.cross_field_keys.len(), 2);
    }

    #[test]
    fn ids_stay_disjoint_across_edits() {
        let mut builder = ModularEditBuilder::new();
        builder.sequence_insert(&FieldUpPath::root("items"), 0, vec![json!(1), json!(2)]).unwrap();
        let next = builder.generate_id(1);
        assert_eq!(next, ChangeAtomId::local(2));
        let change = builder.take_change().unwrap();
        assert_eq!(change.builds[&ChangeAtomId::local(0)].len(), 2);
        assert_eq!(change.max_id, Some(ChangesetLocalId(2)));
    }

    #[test]
    fn revive_carries_refreshers() {
        let mut builder = ModularEditBuilder::new();
        let detached_by = ChangeAtomId::tagged(RevisionTag(1), 3);
        let reviver = |_: RevisionTag, first: ChangesetLocalId, count: u32| -> Vec<NodeContent> {
            (first.0..first.0 + count).map(|i| json!(i)).collect()
        };
        builder.revive(&FieldUpPath::root("items"), 0, 2, detached_by, &reviver).unwrap();
        let change = builder.take_change().unwrap();
        assert_eq!(change.refreshers[&ChangeAtomId::tagged(RevisionTag(1), 4)], json!(4));
        assert!(builder
            .revive(&FieldUpPath::root("items"), 0, 1, ChangeAtomId::local(0), &reviver)
            .is_err());
    }

    #[test]
    fn constraint_marks_the_node() {
        let mut builder = ModularEditBuilder::new();
        builder.add_node_exists_constraint(&UpPath::root_child("items", 0)).unwrap();
        let change = builder.take_change().unwrap();
        let node = change.node_changes.values().next().unwrap();
        assert_eq!(node.node_exists_constraint, Some(NodeExistsConstraint { violated: false }));
    }
}
