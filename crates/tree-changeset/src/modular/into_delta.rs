//! Delta projection and detached-content bookkeeping.

use std::collections::BTreeMap;

use tracing::debug;

use crate::delta::{
    DeltaDetachedNodeBuild, DeltaDetachedNodeDestruction, DeltaFieldMap, DeltaRoot, DetachedNodeId,
};
use crate::error::{ChangesetError, Result};
use crate::ids::NodeId;
use crate::tree::DetachedNodeResolver;

use super::changeset::{FieldChangeMap, ModularChangeset};

pub(super) fn into_delta(change: &ModularChangeset) -> Result<DeltaRoot> {
    if change.is_violated() {
        return Ok(DeltaRoot::default());
    }
    Ok(DeltaRoot {
        fields: field_map_delta(change, &change.field_changes)?,
        build: change
            .builds
            .iter()
            .map(|(&id, trees)| DeltaDetachedNodeBuild {
                id,
                trees: trees.clone(),
            })
            .collect(),
        destroy: change
            .destroys
            .iter()
            .map(|(&id, &count)| DeltaDetachedNodeDestruction { id, count })
            .collect(),
        refreshers: change
            .refreshers
            .iter()
            .map(|(&id, tree)| DeltaDetachedNodeBuild {
                id,
                trees: vec![tree.clone()],
            })
            .collect(),
    })
}

fn field_map_delta(change: &ModularChangeset, fields: &FieldChangeMap) -> Result<DeltaFieldMap> {
    let mut delta = DeltaFieldMap::new();
    for (key, field) in fields {
        let field_delta = field.into_delta(&mut |node| node_delta(change, node))?;
        if !field_delta.is_empty() {
            delta.insert(key.clone(), field_delta);
        }
    }
    Ok(delta)
}

fn node_delta(change: &ModularChangeset, node: NodeId) -> Result<DeltaFieldMap> {
    match &change.node(node)?.field_changes {
        Some(fields) => field_map_delta(change, fields),
        None => Ok(DeltaFieldMap::new()),
    }
}

pub(super) fn relevant_removed_roots(change: &ModularChangeset) -> Result<Vec<DetachedNodeId>> {
    let mut roots = field_map_roots(change, &change.field_changes)?;
    roots.sort();
    roots.dedup();
    Ok(roots)
}

fn field_map_roots(change: &ModularChangeset, fields: &FieldChangeMap) -> Result<Vec<DetachedNodeId>> {
    let mut roots = Vec::new();
    for field in fields.values() {
        roots.extend(field.relevant_removed_roots(&mut |node| match &change.node(node)?.field_changes {
            Some(fields) => field_map_roots(change, fields),
            None => Ok(Vec::new()),
        })?);
    }
    Ok(roots)
}

fn is_built(change: &ModularChangeset, id: DetachedNodeId) -> bool {
    change
        .builds
        .iter()
        .any(|(&start, trees)| id.offset_in(start, trees.len() as u32).is_some())
}

/// Refreshers for exactly the removed roots the change needs and does not
/// build itself. Existing refreshers are reused; the rest come from
/// `resolver`.
pub(super) fn update_refreshers(
    change: &ModularChangeset,
    resolver: &dyn DetachedNodeResolver,
) -> Result<ModularChangeset> {
    let mut refreshers = BTreeMap::new();
    let mut backfilled = 0usize;
    for root in relevant_removed_roots(change)? {
        if is_built(change, root) {
            continue;
        }
        let content = match change.refreshers.get(&root) {
            Some(content) => content.clone(),
            None => {
                backfilled += 1;
                resolver.resolve(root).ok_or_else(|| {
                    ChangesetError::InvariantViolation(format!("no content for detached node {root}"))
                })?
            }
        };
        refreshers.insert(root, content);
    }
    if backfilled > 0 {
        debug!(backfilled, total = refreshers.len(), "back-filled refreshers");
    }
    Ok(ModularChangeset {
        refreshers,
        ..change.clone()
    })
}
