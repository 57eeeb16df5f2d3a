//! Composition of two modular changesets.
//!
//! Fields are composed top-down. Composing a field reports the child nodes
//! both sides touch; those node pairs are composed next. Once the worklist
//! is drained, fields whose cross-field inputs changed are composed again
//! from their recorded inputs until nothing changes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::cross_field::CrossFieldTable;
use crate::delta::DetachedNodeId;
use crate::error::Result;
use crate::field_kinds::{FieldChange, FieldContext};
use crate::ids::{IdAllocator, NodeId};
use crate::revision::RevisionMetadata;
use crate::sequence_field::MoveEffect;
use crate::tree::{FieldId, FieldKey, NodeContent};

use super::changeset::{FieldChangeMap, ModularChangeset, NodeChangeset, NodeExistsConstraint};
use super::fixpoint::{map_field, Fixpoint, NodePairs};

#[derive(Debug, Clone)]
struct ComposedField {
    base: Option<FieldChange>,
    new: Option<FieldChange>,
    result: FieldChange,
}

struct ComposeState<'a> {
    base: &'a ModularChangeset,
    new: &'a ModularChangeset,
    metadata: &'a RevisionMetadata,
    table: CrossFieldTable<MoveEffect>,
    id_allocator: IdAllocator,
    nodes: NodePairs,
    fields: BTreeMap<FieldId, ComposedField>,
}

pub(super) fn compose_pair(
    base: &ModularChangeset,
    new: &ModularChangeset,
    metadata: &RevisionMetadata,
    max_passes: usize,
) -> Result<ModularChangeset> {
    let mut state = ComposeState {
        base,
        new,
        metadata,
        table: CrossFieldTable::new(),
        id_allocator: IdAllocator::from_max_id(base.max_id.max(new.max_id)),
        nodes: NodePairs::new(),
        fields: BTreeMap::new(),
    };
    for key in union_keys(Some(&base.field_changes), Some(&new.field_changes)) {
        state.compose_field(
            FieldId::new(None, key.clone()),
            base.field_changes.get(&key),
            new.field_changes.get(&key),
        )?;
    }
    let mut fixpoint = Fixpoint::new(max_passes);
    loop {
        while let Some(out) = state.nodes.pop() {
            state.compose_node(out)?;
        }
        let Some(invalid) = fixpoint.next_pass(
            &mut state.table,
            |key| {
                let mut owners = BTreeSet::new();
                for field in base.cross_field_keys.fields_for_range(key) {
                    owners.extend(map_field(&field, |n| state.nodes.out_of_first(n)));
                }
                for field in new.cross_field_keys.fields_for_range(key) {
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
            trace!(%field, "recomposing field");
            state.compose_field(field, recorded.base.as_ref(), recorded.new.as_ref())?;
        }
    }
    state.assemble()
}

impl ComposeState<'_> {
    fn compose_field(&mut self, field: FieldId, base: Option<&FieldChange>, new: Option<&FieldChange>) -> Result<()> {
        let Some(kind) = base.or(new).map(FieldChange::kind) else {
            return Ok(());
        };
        let empty_base;
        let empty_new;
        let base_change = match base {
            Some(change) => change,
            None => {
                empty_base = FieldChange::empty(kind);
                &empty_base
            }
        };
        let new_change = match new {
            Some(change) => change,
            None => {
                empty_new = FieldChange::empty(kind);
                &empty_new
            }
        };
        let nodes = &mut self.nodes;
        let mut manager = self.table.manager(field.clone());
        let mut cx = FieldContext {
            id_allocator: &mut self.id_allocator,
            cross_field: &mut manager,
            metadata: self.metadata,
            inverse_move_ids: None,
        };
        let result = base_change.compose(new_change, &mut |b, n| nodes.record(b, n), &mut cx)?;
        self.fields.insert(
            field,
            ComposedField {
                base: base.cloned(),
                new: new.cloned(),
                result,
            },
        );
        Ok(())
    }

    fn compose_node(&mut self, out: NodeId) -> Result<()> {
        let Some((base_id, new_id)) = self.nodes.get(out) else {
            return Ok(());
        };
        let (base, new) = (self.base, self.new);
        let base_fields = base_id.map(|id| base.node(id)).transpose()?.and_then(|n| n.field_changes.as_ref());
        let new_fields = new_id.map(|id| new.node(id)).transpose()?.and_then(|n| n.field_changes.as_ref());
        for key in union_keys(base_fields, new_fields) {
            self.compose_field(
                FieldId::new(Some(out), key.clone()),
                base_fields.and_then(|f| f.get(&key)),
                new_fields.and_then(|f| f.get(&key)),
            )?;
        }
        Ok(())
    }

    fn field_map(&self, node: Option<NodeId>, keys: Vec<FieldKey>) -> FieldChangeMap {
        keys.into_iter()
            .filter_map(|key| {
                let composed = self.fields.get(&FieldId::new(node, key.clone()))?;
                Some((key, composed.result.clone()))
            })
            .collect()
    }

    fn assemble(self) -> Result<ModularChangeset> {
        let (base, new) = (self.base, self.new);
        let field_changes = self.field_map(None, union_keys(Some(&base.field_changes), Some(&new.field_changes)));
        let mut node_changes = BTreeMap::new();
        for (out, (base_id, new_id)) in self.nodes.outputs() {
            let base_node = base_id.map(|id| base.node(id)).transpose()?;
            let new_node = new_id.map(|id| new.node(id)).transpose()?;
            let keys = union_keys(
                base_node.and_then(|n| n.field_changes.as_ref()),
                new_node.and_then(|n| n.field_changes.as_ref()),
            );
            let fields = self.field_map(Some(out), keys);
            let constraint = compose_constraints(
                base_node.and_then(|n| n.node_exists_constraint),
                new_node.and_then(|n| n.node_exists_constraint),
            );
            node_changes.insert(
                out,
                NodeChangeset {
                    field_changes: (!fields.is_empty()).then_some(fields),
                    node_exists_constraint: constraint,
                },
            );
        }

        let mut revisions = base.revisions.clone();
        for info in &new.revisions {
            if !revisions.iter().any(|r| r.revision == info.revision) {
                revisions.push(*info);
            }
        }
        let (builds, destroys) = compose_builds_and_destroys(base, new);
        let mut refreshers = base.refreshers.clone();
        for (id, content) in &new.refreshers {
            refreshers.entry(*id).or_insert_with(|| content.clone());
        }

        let mut change = ModularChangeset {
            field_changes,
            node_changes,
            max_id: self.id_allocator.max_id().max(base.max_id).max(new.max_id),
            revisions,
            builds,
            destroys,
            refreshers,
            ..ModularChangeset::default()
        };
        change.rebuild_indices()?;
        Ok(change)
    }
}

/// Keys of both maps, `a`'s order first.
pub(super) fn union_keys(a: Option<&FieldChangeMap>, b: Option<&FieldChangeMap>) -> Vec<FieldKey> {
    let mut keys: Vec<FieldKey> = a.into_iter().flat_map(|m| m.keys().cloned()).collect();
    for key in b.into_iter().flat_map(|m| m.keys()) {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

fn compose_constraints(
    a: Option<NodeExistsConstraint>,
    b: Option<NodeExistsConstraint>,
) -> Option<NodeExistsConstraint> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(NodeExistsConstraint {
            violated: a.is_some_and(|c| c.violated) || b.is_some_and(|c| c.violated),
        }),
    }
}

/// Content built by one side and destroyed by the other cancels out.
fn compose_builds_and_destroys(
    base: &ModularChangeset,
    new: &ModularChangeset,
) -> (BTreeMap<DetachedNodeId, Vec<NodeContent>>, BTreeMap<DetachedNodeId, u32>) {
    let mut builds = base.builds.clone();
    for (id, trees) in &new.builds {
        builds.entry(*id).or_insert_with(|| trees.clone());
    }
    let mut destroys = base.destroys.clone();
    for (&id, &count) in &new.destroys {
        destroys.entry(id).or_insert(count);
    }
    let cancelled: Vec<DetachedNodeId> = destroys
        .iter()
        .filter(|&(id, &count)| builds.get(id).is_some_and(|trees| trees.len() == count as usize))
        .map(|(&id, _)| id)
        .collect();
    for id in cancelled {
        builds.remove(&id);
        destroys.remove(&id);
    }
    (builds, destroys)
}
