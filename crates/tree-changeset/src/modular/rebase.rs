//! Rebasing a modular changeset over another.
//!
//! Every field either side touches is rebased, including fields only the
//! base changes: the base's moves may carry the new change's nested edits
//! into them. Nodes the new change has no edits for are kept as empty
//! placeholders and pruned at the end.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::cross_field::CrossFieldTable;
use crate::error::Result;
use crate::field_kinds::{FieldChange, FieldContext, NodeExistenceState};
use crate::ids::{IdAllocator, NodeId};
use crate::revision::RevisionMetadata;
use crate::sequence_field::MoveEffect;
use crate::tree::{FieldId, FieldKey};

use super::changeset::{FieldChangeMap, ModularChangeset, NodeChangeset, NodeExistsConstraint};
use super::compose::union_keys;
use super::fixpoint::{map_field, Fixpoint, NodePairs};

#[derive(Debug, Clone)]
struct RebasedField {
    new: Option<FieldChange>,
    base: Option<FieldChange>,
    existence: NodeExistenceState,
    result: FieldChange,
}

struct RebaseState<'a> {
    change: &'a ModularChangeset,
    over: &'a ModularChangeset,
    metadata: &'a RevisionMetadata,
    table: CrossFieldTable<MoveEffect>,
    id_allocator: IdAllocator,
    /// Output node id to `(new, base)` node ids.
    nodes: NodePairs,
    existence: BTreeMap<NodeId, NodeExistenceState>,
    fields: BTreeMap<FieldId, RebasedField>,
}

pub(super) fn rebase(
    change: &ModularChangeset,
    over: &ModularChangeset,
    metadata: &RevisionMetadata,
    max_passes: usize,
) -> Result<ModularChangeset> {
    if over.is_violated() {
        return Ok(change.clone());
    }
    let mut state = RebaseState {
        change,
        over,
        metadata,
        table: CrossFieldTable::new(),
        id_allocator: IdAllocator::from_max_id(change.max_id.max(over.max_id)),
        nodes: NodePairs::new(),
        existence: BTreeMap::new(),
        fields: BTreeMap::new(),
    };
    for key in union_keys(Some(&change.field_changes), Some(&over.field_changes)) {
        state.rebase_field(
            FieldId::new(None, key.clone()),
            change.field_changes.get(&key),
            over.field_changes.get(&key),
            NodeExistenceState::Alive,
        )?;
    }
    let mut fixpoint = Fixpoint::new(max_passes);
    loop {
        while let Some(out) = state.nodes.pop() {
            state.rebase_node(out)?;
        }
        let Some(invalid) = fixpoint.next_pass(
            &mut state.table,
            |key| {
                let mut owners = BTreeSet::new();
                for field in change.cross_field_keys.fields_for_range(key) {
                    owners.extend(map_field(&field, |n| state.nodes.out_of_first(n)));
                }
                for field in over.cross_field_keys.fields_for_range(key) {
                    owners.extend(map_field(&field, |n| state.nodes.out_of_second(n)));
                }
                owners
            },
            |field| state.fields.contains_key(field),
        )?
        else {
            break;
        };
        for field in invalid {
            let Some(recorded) = state.fields.get(&field).cloned() else {
                continue;
            };
            trace!(%field, "rebasing field again");
            state.rebase_field(field, recorded.new.as_ref(), recorded.base.as_ref(), recorded.existence)?;
        }
    }
    state.assemble()
}

impl RebaseState<'_> {
    fn rebase_field(
        &mut self,
        field: FieldId,
        new: Option<&FieldChange>,
        base: Option<&FieldChange>,
        existence: NodeExistenceState,
    ) -> Result<()> {
        let Some(kind) = new.or(base).map(FieldChange::kind) else {
            return Ok(());
        };
        let empty_new;
        let empty_base;
        let new_change = match new {
            Some(change) => change,
            None => {
                empty_new = FieldChange::empty(kind);
                &empty_new
            }
        };
        let base_change = match base {
            Some(change) => change,
            None => {
                empty_base = FieldChange::empty(kind);
                &empty_base
            }
        };
        let nodes = &mut self.nodes;
        let states = &mut self.existence;
        let mut rebase_child = |n: Option<NodeId>, b: Option<NodeId>, state: NodeExistenceState| -> Result<Option<NodeId>> {
            let out = nodes.record(n, b)?;
            if states.insert(out, state).is_some_and(|previous| previous != state) {
                nodes.requeue(out);
            }
            Ok(Some(out))
        };
        let mut manager = self.table.manager(field.clone());
        let mut cx = FieldContext {
            id_allocator: &mut self.id_allocator,
            cross_field: &mut manager,
            metadata: self.metadata,
            inverse_move_ids: None,
        };
        let result = new_change.rebase(base_change, &mut rebase_child, &mut cx, existence)?;
        self.fields.insert(
            field,
            RebasedField {
                new: new.cloned(),
                base: base.cloned(),
                existence,
                result,
            },
        );
        Ok(())
    }

    fn rebase_node(&mut self, out: NodeId) -> Result<()> {
        let Some((new_id, base_id)) = self.nodes.get(out) else {
            return Ok(());
        };
        let existence = self.existence.get(&out).copied().unwrap_or(NodeExistenceState::Alive);
        let (change, over) = (self.change, self.over);
        let new_fields = new_id.map(|id| change.node(id)).transpose()?.and_then(|n| n.field_changes.as_ref());
        let base_fields = base_id.map(|id| over.node(id)).transpose()?.and_then(|n| n.field_changes.as_ref());
        for key in union_keys(new_fields, base_fields) {
            self.rebase_field(
                FieldId::new(Some(out), key.clone()),
                new_fields.and_then(|f| f.get(&key)),
                base_fields.and_then(|f| f.get(&key)),
                existence,
            )?;
        }
        Ok(())
    }

    fn field_map(&self, node: Option<NodeId>, keys: Vec<FieldKey>) -> FieldChangeMap {
        keys.into_iter()
            .filter_map(|key| {
                let rebased = self.fields.get(&FieldId::new(node, key.clone()))?;
                Some((key, rebased.result.clone()))
            })
            .collect()
    }

    fn assemble(self) -> Result<ModularChangeset> {
        let (change, over) = (self.change, self.over);
        let field_changes = self.field_map(None, union_keys(Some(&change.field_changes), Some(&over.field_changes)));
        let mut node_changes = BTreeMap::new();
        for (out, (new_id, base_id)) in self.nodes.outputs() {
            let new_node = new_id.map(|id| change.node(id)).transpose()?;
            let base_node = base_id.map(|id| over.node(id)).transpose()?;
            let keys = union_keys(
                new_node.and_then(|n| n.field_changes.as_ref()),
                base_node.and_then(|n| n.field_changes.as_ref()),
            );
            let fields = self.field_map(Some(out), keys);
            let dead = self.existence.get(&out) == Some(&NodeExistenceState::Dead);
            let constraint = new_node
                .and_then(|n| n.node_exists_constraint)
                .map(|_| NodeExistsConstraint { violated: dead });
            node_changes.insert(
                out,
                NodeChangeset {
                    field_changes: (!fields.is_empty()).then_some(fields),
                    node_exists_constraint: constraint,
                },
            );
        }
        let mut rebased = ModularChangeset {
            field_changes,
            node_changes,
            max_id: self.id_allocator.max_id().max(change.max_id),
            revisions: change.revisions.clone(),
            builds: change.builds.clone(),
            destroys: change.destroys.clone(),
            refreshers: change.refreshers.clone(),
            ..ModularChangeset::default()
        };
        rebased.rebuild_indices()?;
        super::prune::prune(&rebased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ChangeAtomId, RevisionTag};
    use crate::sequence_field::{editor, CellId, Mark};

    fn tag(rev: u64, id: u32) -> ChangeAtomId {
        ChangeAtomId::tagged(RevisionTag(rev), id)
    }

    fn single(key: &str, change: FieldChange) -> FieldChangeMap {
        let mut map = FieldChangeMap::new();
        map.insert(FieldKey::from(key), change);
        map
    }

    fn constrained(key: &str, index: usize, node: NodeId) -> ModularChangeset {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            node,
            NodeChangeset {
                field_changes: None,
                node_exists_constraint: Some(NodeExistsConstraint::default()),
            },
        );
        ModularChangeset::new(single(key, FieldChange::Sequence(editor::modify(index, node).unwrap())), nodes)
            .unwrap()
    }

    #[test]
    fn constraint_is_violated_by_concurrent_delete() {
        let change = constrained("items", 1, tag(2, 0));
        let over = ModularChangeset::new(
            single("items", FieldChange::Sequence(editor::delete(0, 3, tag(1, 0)).unwrap())),
            BTreeMap::new(),
        )
        .unwrap();
        let rebased = rebase(&change, &over, &RevisionMetadata::default(), 8).unwrap();
        assert_eq!(rebased.constraint_violation_count, 1);
        assert_eq!(
            rebased.field_changes[&FieldKey::from("items")],
            FieldChange::Sequence(vec![Mark::tombstone(1, CellId::new(tag(1, 1))).with_changes(tag(2, 0))])
        );
    }

    #[test]
    fn constraint_holds_when_node_survives() {
        let change = constrained("items", 0, tag(2, 0));
        let over = ModularChangeset::new(
            single("items", FieldChange::Sequence(editor::insert(0, 2, tag(1, 0)).unwrap())),
            BTreeMap::new(),
        )
        .unwrap();
        let rebased = rebase(&change, &over, &RevisionMetadata::default(), 8).unwrap();
        assert_eq!(rebased.constraint_violation_count, 0);
        assert_eq!(
            rebased.field_changes[&FieldKey::from("items")],
            FieldChange::Sequence(vec![Mark::skip(2), Mark::modify(tag(2, 0))])
        );
    }

    #[test]
    fn nested_edit_follows_cross_field_move() {
        let m = tag(1, 0);
        let mut over_fields = FieldChangeMap::new();
        over_fields.insert(FieldKey::from("src"), FieldChange::Sequence(vec![Mark::move_out(1, m)]));
        over_fields.insert(
            FieldKey::from("dst"),
            FieldChange::Sequence(vec![Mark::skip(2), Mark::move_in(1, m)]),
        );
        let over = ModularChangeset::new(over_fields, BTreeMap::new()).unwrap();

        let child = tag(2, 0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            child,
            NodeChangeset::with_fields(single(
                "x",
                FieldChange::Sequence(editor::delete(0, 1, tag(2, 1)).unwrap()),
            )),
        );
        let change = ModularChangeset::new(single("src", FieldChange::Sequence(vec![Mark::modify(child)])), nodes)
            .unwrap();

        let rebased = rebase(&change, &over, &RevisionMetadata::default(), 8).unwrap();
        assert!(!rebased.field_changes.contains_key(&FieldKey::from("src")));
        assert_eq!(
            rebased.field_changes[&FieldKey::from("dst")],
            FieldChange::Sequence(vec![Mark::skip(2), Mark::modify(child)])
        );
        assert_eq!(rebased.node_to_parent[&child], FieldId::root("dst"));
    }
}
