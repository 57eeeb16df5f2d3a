//! Removal of inert structure: empty fields and nodes without effect.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::ids::NodeId;

use super::changeset::{FieldChangeMap, ModularChangeset, NodeChangeset};

pub(super) fn prune(change: &ModularChangeset) -> Result<ModularChangeset> {
    let mut kept = BTreeMap::new();
    let field_changes = prune_field_map(change, &change.field_changes, &mut kept)?;
    let mut pruned = ModularChangeset {
        field_changes,
        node_changes: kept,
        ..change.clone()
    };
    pruned.rebuild_indices()?;
    Ok(pruned)
}

fn prune_field_map(
    change: &ModularChangeset,
    fields: &FieldChangeMap,
    kept: &mut BTreeMap<NodeId, NodeChangeset>,
) -> Result<FieldChangeMap> {
    let mut out = FieldChangeMap::new();
    for (key, field) in fields {
        let pruned = field.prune(&mut |node| prune_node_change(change, node, kept))?;
        if !pruned.is_empty() {
            out.insert(key.clone(), pruned);
        }
    }
    Ok(out)
}

/// Prunes a node's fields; returns `None` when nothing is left.
fn prune_node_change(
    change: &ModularChangeset,
    id: NodeId,
    kept: &mut BTreeMap<NodeId, NodeChangeset>,
) -> Result<Option<NodeId>> {
    let node = change.node(id)?;
    let field_changes = match &node.field_changes {
        Some(fields) => Some(prune_field_map(change, fields, kept)?).filter(|f| !f.is_empty()),
        None => None,
    };
    let pruned = NodeChangeset {
        field_changes,
        node_exists_constraint: node.node_exists_constraint,
    };
    if pruned.is_empty() {
        return Ok(None);
    }
    kept.insert(id, pruned);
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_kinds::{FieldChange, GenericChangeset};
    use crate::ids::ChangeAtomId;
    use crate::sequence_field::{editor, Mark};
    use crate::tree::FieldKey;

    #[test]
    fn empty_nodes_and_fields_disappear() {
        let (a, b) = (ChangeAtomId::local(1), ChangeAtomId::local(2));
        let mut root = FieldChangeMap::new();
        root.insert(
            FieldKey::from("items"),
            FieldChange::Sequence(vec![Mark::modify(a), Mark::skip(1), Mark::modify(b)]),
        );
        root.insert(FieldKey::from("other"), FieldChange::Generic(GenericChangeset::new()));
        let mut nodes = BTreeMap::new();
        let mut empty_fields = FieldChangeMap::new();
        empty_fields.insert(FieldKey::from("x"), FieldChange::Sequence(Vec::new()));
        nodes.insert(a, NodeChangeset::with_fields(empty_fields));
        let mut live = FieldChangeMap::new();
        live.insert(FieldKey::from("y"), FieldChange::Sequence(editor::delete(0, 1, ChangeAtomId::local(9)).unwrap()));
        nodes.insert(b, NodeChangeset::with_fields(live));
        let change = ModularChangeset::new(root, nodes).unwrap();

        let pruned = prune(&change).unwrap();
        assert_eq!(pruned.field_changes.len(), 1);
        assert_eq!(
            pruned.field_changes[&FieldKey::from("items")],
            FieldChange::Sequence(vec![Mark::skip(2), Mark::modify(b)])
        );
        assert_eq!(pruned.node_changes.keys().copied().collect::<Vec<_>>(), vec![b]);
        assert_eq!(prune(&pruned).unwrap(), pruned);
    }
}
