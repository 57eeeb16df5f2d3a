//! Inversion of a modular changeset.
//!
//! Every field is inverted in place; node ids are kept. Moves deposit the
//! nested changes of their sources for the destinations to pick up, so
//! fields that read a deposit before it was made are inverted again.
//! Inverses that are not rollbacks give every move a fresh id, reserved up
//! front so both ends of a move agree on it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::cross_field::{CrossFieldTable, InverseMoveIds};
use crate::error::Result;
use crate::field_kinds::{FieldChange, FieldContext};
use crate::ids::IdAllocator;
use crate::revision::RevisionMetadata;
use crate::sequence_field::MoveEffect;
use crate::tree::FieldId;

use super::changeset::{FieldChangeMap, ModularChangeset, NodeChangeset};
use super::fixpoint::Fixpoint;

pub(super) fn invert(
    change: &ModularChangeset,
    is_rollback: bool,
    metadata: &RevisionMetadata,
    max_passes: usize,
) -> Result<ModularChangeset> {
    if change.is_violated() {
        return Ok(ModularChangeset {
            max_id: change.max_id,
            ..ModularChangeset::default()
        });
    }
    let mut table = CrossFieldTable::<MoveEffect>::new();
    let mut id_allocator = IdAllocator::from_max_id(change.max_id);
    let move_ids = (!is_rollback).then(|| InverseMoveIds::allocate(&change.cross_field_keys, &mut id_allocator));
    let mut results: BTreeMap<FieldId, FieldChange> = BTreeMap::new();
    let mut invert_field = |field: &FieldId,
                            table: &mut CrossFieldTable<MoveEffect>,
                            results: &mut BTreeMap<FieldId, FieldChange>|
     -> Result<()> {
        let Some(input) = change.field_change(field) else {
            return Ok(());
        };
        let mut manager = table.manager(field.clone());
        let mut cx = FieldContext {
            id_allocator: &mut id_allocator,
            cross_field: &mut manager,
            metadata,
            inverse_move_ids: move_ids.as_ref(),
        };
        results.insert(field.clone(), input.invert(is_rollback, &mut cx)?);
        Ok(())
    };

    let fields = change.fields()?;
    for field in &fields {
        invert_field(field, &mut table, &mut results)?;
    }
    let mut fixpoint = Fixpoint::new(max_passes);
    loop {
        let processed: BTreeSet<FieldId> = results.keys().cloned().collect();
        let Some(invalid) = fixpoint.next_pass(
            &mut table,
            |key| change.cross_field_keys.fields_for_range(key),
            |field| processed.contains(field),
        )?
        else {
            break;
        };
        for field in invalid {
            trace!(%field, "re-inverting field");
            invert_field(&field, &mut table, &mut results)?;
        }
    }

    let take_map = |node, map: &FieldChangeMap, results: &mut BTreeMap<FieldId, FieldChange>| -> FieldChangeMap {
        map.keys()
            .filter_map(|key| Some((key.clone(), results.remove(&FieldId::new(node, key.clone()))?)))
            .collect()
    };
    let field_changes = take_map(None, &change.field_changes, &mut results);
    let mut node_changes = BTreeMap::new();
    for (&id, node) in &change.node_changes {
        let fields = node
            .field_changes
            .as_ref()
            .map(|map| take_map(Some(id), map, &mut results));
        node_changes.insert(
            id,
            NodeChangeset {
                field_changes: fields,
                node_exists_constraint: node.node_exists_constraint,
            },
        );
    }

    let destroys = if is_rollback {
        change
            .builds
            .iter()
            .map(|(&id, trees)| (id, trees.len() as u32))
            .collect()
    } else {
        BTreeMap::new()
    };
    let mut inverse = ModularChangeset {
        field_changes,
        node_changes,
        max_id: id_allocator.max_id().max(change.max_id),
        destroys,
        ..ModularChangeset::default()
    };
    inverse.rebuild_indices()?;
    Ok(inverse)
}
