//! Structural checks on produced changesets.

use crate::error::{ensure, Result};
use crate::field_kinds::FieldChange;

use super::changeset::ModularChangeset;

/// Checks that the derived indices match the field changes and that
/// sequence marks are well formed.
pub(super) fn validate(change: &ModularChangeset) -> Result<()> {
    let mut rebuilt = change.clone();
    rebuilt.rebuild_indices()?;
    ensure!(
        rebuilt.node_changes.len() == change.node_changes.len(),
        "{} node changes are unreachable",
        change.node_changes.len() - rebuilt.node_changes.len()
    );
    ensure!(rebuilt.node_to_parent == change.node_to_parent, "stale node-to-parent index");
    ensure!(rebuilt.cross_field_keys == change.cross_field_keys, "stale cross-field key table");
    ensure!(
        rebuilt.constraint_violation_count == change.constraint_violation_count,
        "violation count is {} but {} nodes are violated",
        change.constraint_violation_count,
        rebuilt.constraint_violation_count
    );
    for field in change.fields()? {
        let Some(FieldChange::Sequence(marks)) = change.field_change(&field) else {
            continue;
        };
        for mark in marks {
            ensure!(mark.count > 0, "empty mark in {field}");
            ensure!(
                mark.changes.is_none() || mark.count == 1,
                "mark with nested changes spans {} cells in {field}",
                mark.count
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::ids::ChangeAtomId;
    use crate::modular::changeset::{FieldChangeMap, NodeChangeset};
    use crate::sequence_field::Mark;
    use crate::tree::FieldKey;

    #[test]
    fn detects_stale_indices_and_bad_marks() {
        let node = ChangeAtomId::local(1);
        let mut fields = FieldChangeMap::new();
        fields.insert(FieldKey::from("items"), FieldChange::Sequence(vec![Mark::modify(node)]));
        let mut nodes = BTreeMap::new();
        nodes.insert(node, NodeChangeset::default());
        let change = ModularChangeset::new(fields, nodes).unwrap();
        assert!(validate(&change).is_ok());

        let mut stale = change.clone();
        stale.node_to_parent.clear();
        assert!(validate(&stale).is_err());

        let mut wide = change;
        wide.field_changes.insert(
            FieldKey::from("items"),
            FieldChange::Sequence(vec![Mark::skip(2).with_changes(node)]),
        );
        assert!(validate(&wide).is_err());
    }
}
