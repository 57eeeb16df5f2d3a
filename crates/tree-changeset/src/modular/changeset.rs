//! The document-level changeset.
//!
//! Node changes live in a flat arena keyed by [`NodeId`]; fields refer to
//! their children by id. `node_to_parent` and `cross_field_keys` are derived
//! indices, recomputed by [`ModularChangeset::rebuild_indices`] whenever a
//! changeset is produced.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use crate::cross_field::CrossFieldKeyTable;
use crate::delta::DetachedNodeId;
use crate::error::{fail, ChangesetError, Result};
use crate::field_kinds::FieldChange;
use crate::ids::{ChangesetLocalId, NodeId, RevisionTag};
use crate::revision::RevisionInfo;
use crate::tree::{FieldId, FieldKey, NodeContent};

pub type FieldChangeMap = IndexMap<FieldKey, FieldChange>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeExistsConstraint {
    pub violated: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeChangeset {
    pub field_changes: Option<FieldChangeMap>,
    pub node_exists_constraint: Option<NodeExistsConstraint>,
}

impl NodeChangeset {
    pub fn with_fields(field_changes: FieldChangeMap) -> Self {
        Self {
            field_changes: Some(field_changes),
            node_exists_constraint: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_exists_constraint.is_none()
            && self.field_changes.as_ref().map_or(true, |f| f.is_empty())
    }

    pub fn is_violated(&self) -> bool {
        self.node_exists_constraint.is_some_and(|c| c.violated)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModularChangeset {
    pub field_changes: FieldChangeMap,
    pub node_changes: BTreeMap<NodeId, NodeChangeset>,
    pub node_to_parent: BTreeMap<NodeId, FieldId>,
    pub cross_field_keys: CrossFieldKeyTable,
    /// Largest local id used by the changeset.
    pub max_id: Option<ChangesetLocalId>,
    /// Revisions the changeset is made of, oldest first.
    pub revisions: Vec<RevisionInfo>,
    pub constraint_violation_count: usize,
    /// Content created by the change, keyed by the id of its first node.
    pub builds: BTreeMap<DetachedNodeId, Vec<NodeContent>>,
    /// Detached content the change discards: first id and node count.
    pub destroys: BTreeMap<DetachedNodeId, u32>,
    /// Detached content the change needs but does not create.
    pub refreshers: BTreeMap<DetachedNodeId, NodeContent>,
}

impl ModularChangeset {
    /// A changeset with the given fields and nodes; derived indices are
    /// computed here.
    pub fn new(field_changes: FieldChangeMap, node_changes: BTreeMap<NodeId, NodeChangeset>) -> Result<Self> {
        let mut change = Self {
            field_changes,
            node_changes,
            ..Self::default()
        };
        change.rebuild_indices()?;
        Ok(change)
    }

    pub fn with_max_id(mut self, max_id: Option<ChangesetLocalId>) -> Self {
        self.max_id = max_id;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.field_changes.values().all(FieldChange::is_empty)
            && self.builds.is_empty()
            && self.destroys.is_empty()
            && self.refreshers.is_empty()
    }

    pub fn is_violated(&self) -> bool {
        self.constraint_violation_count > 0
    }

    /// The single revision the changeset carries, if any.
    pub fn revision(&self) -> Option<RevisionTag> {
        match self.revisions.as_slice() {
            [info] => Some(info.revision),
            _ => None,
        }
    }

    pub fn field_map(&self, node: Option<NodeId>) -> Option<&FieldChangeMap> {
        match node {
            None => Some(&self.field_changes),
            Some(node) => self.node_changes.get(&node)?.field_changes.as_ref(),
        }
    }

    pub fn field_change(&self, field: &FieldId) -> Option<&FieldChange> {
        self.field_map(field.node)?.get(&field.field)
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeChangeset> {
        self.node_changes.get(&id).ok_or(ChangesetError::UnknownNode(id))
    }

    /// Every field reachable from the root, parents before children.
    pub fn fields(&self) -> Result<Vec<FieldId>> {
        let mut out = Vec::new();
        let mut stack: Vec<Option<NodeId>> = vec![None];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            let Some(fields) = self.field_map(node) else {
                continue;
            };
            for (key, change) in fields {
                out.push(FieldId::new(node, key.clone()));
                for child in change.nested_changes() {
                    if !seen.insert(child) {
                        fail!("node {child} is referenced from two places");
                    }
                    self.node(child)?;
                    stack.push(Some(child));
                }
            }
        }
        Ok(out)
    }

    /// Recomputes `node_to_parent`, `cross_field_keys` and the violation
    /// count from the field changes, dropping unreachable nodes.
    pub fn rebuild_indices(&mut self) -> Result<()> {
        let mut node_to_parent = BTreeMap::new();
        let mut cross_field_keys = CrossFieldKeyTable::new();
        for field in self.fields()? {
            let Some(change) = self.field_change(&field) else {
                continue;
            };
            for child in change.nested_changes() {
                node_to_parent.insert(child, field.clone());
            }
            for key in change.cross_field_keys() {
                cross_field_keys.insert(key, field.clone());
            }
        }
        self.node_changes.retain(|id, _| node_to_parent.contains_key(id));
        self.constraint_violation_count = self
            .node_changes
            .values()
            .filter(|n| n.is_violated())
            .count();
        self.node_to_parent = node_to_parent;
        self.cross_field_keys = cross_field_keys;
        Ok(())
    }
}
