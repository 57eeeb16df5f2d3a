//! Generic field kind: child changes by index, no structural edits.
//!
//! Used for the ancestors of an edit when the editor does not know the kind
//! of the field. Converts to any other kind on demand.

use std::collections::BTreeMap;

use crate::cross_field::CrossFieldKeyRange;
use crate::delta::{DeltaFieldChanges, DeltaMark, DetachedNodeId};
use crate::error::Result;
use crate::ids::NodeId;
use crate::revision::RevisionReplacer;

use super::{
    ChildDelta, ChildRemovedRoots, ComposeChild, FieldChangeHandler, FieldContext,
    FieldKindIdentifier, NodeExistenceState, PruneChild, RebaseChild,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericChangeset {
    entries: BTreeMap<usize, NodeId>,
}

impl GenericChangeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(index: usize, node: NodeId) -> Self {
        let mut change = Self::new();
        change.entries.insert(index, node);
        change
    }

    pub fn insert(&mut self, index: usize, node: NodeId) {
        self.entries.insert(index, node);
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn children(&self) -> Vec<(usize, NodeId)> {
        self.entries.iter().map(|(&i, &n)| (i, n)).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFieldHandler;

impl FieldChangeHandler for GenericFieldHandler {
    type Changeset = GenericChangeset;

    const KIND: FieldKindIdentifier = FieldKindIdentifier::Generic;

    fn compose(
        &self,
        change1: &GenericChangeset,
        change2: &GenericChangeset,
        compose_child: ComposeChild<'_>,
        _cx: &mut FieldContext<'_>,
    ) -> Result<GenericChangeset> {
        let mut pairs: BTreeMap<usize, (Option<NodeId>, Option<NodeId>)> = BTreeMap::new();
        for (&index, &node) in &change1.entries {
            pairs.entry(index).or_default().0 = Some(node);
        }
        for (&index, &node) in &change2.entries {
            pairs.entry(index).or_default().1 = Some(node);
        }
        let mut result = GenericChangeset::new();
        for (index, (a, b)) in pairs {
            result.insert(index, compose_child(a, b)?);
        }
        Ok(result)
    }

    fn invert(
        &self,
        change: &GenericChangeset,
        _is_rollback: bool,
        _cx: &mut FieldContext<'_>,
    ) -> Result<GenericChangeset> {
        Ok(change.clone())
    }

    fn rebase(
        &self,
        change: &GenericChangeset,
        over: &GenericChangeset,
        rebase_child: RebaseChild<'_>,
        _cx: &mut FieldContext<'_>,
        existence: NodeExistenceState,
    ) -> Result<GenericChangeset> {
        let mut result = GenericChangeset::new();
        for (&index, &node) in &change.entries {
            if let Some(rebased) = rebase_child(Some(node), over.get(index), existence)? {
                result.insert(index, rebased);
            }
        }
        for (&index, &base) in &over.entries {
            if change.entries.contains_key(&index) {
                continue;
            }
            if let Some(rebased) = rebase_child(None, Some(base), existence)? {
                result.insert(index, rebased);
            }
        }
        Ok(result)
    }

    fn prune(
        &self,
        change: &GenericChangeset,
        prune_child: PruneChild<'_>,
    ) -> Result<GenericChangeset> {
        let mut result = GenericChangeset::new();
        for (&index, &node) in &change.entries {
            if let Some(pruned) = prune_child(node)? {
                result.insert(index, pruned);
            }
        }
        Ok(result)
    }

    fn is_empty(&self, change: &GenericChangeset) -> bool {
        change.entries.is_empty()
    }

    fn relevant_removed_roots(
        &self,
        change: &GenericChangeset,
        from_child: ChildRemovedRoots<'_>,
    ) -> Result<Vec<DetachedNodeId>> {
        let mut roots = Vec::new();
        for &node in change.entries.values() {
            roots.extend(from_child(node)?);
        }
        Ok(roots)
    }

    fn cross_field_keys(&self, _change: &GenericChangeset) -> Vec<CrossFieldKeyRange> {
        Vec::new()
    }

    fn nested_changes(&self, change: &GenericChangeset) -> Vec<NodeId> {
        change.entries.values().copied().collect()
    }

    fn replace_revisions(
        &self,
        change: &GenericChangeset,
        replacer: &RevisionReplacer,
    ) -> GenericChangeset {
        GenericChangeset {
            entries: change
                .entries
                .iter()
                .map(|(&i, &n)| (i, replacer.atom(n)))
                .collect(),
        }
    }

    fn into_delta(
        &self,
        change: &GenericChangeset,
        child_delta: ChildDelta<'_>,
    ) -> Result<DeltaFieldChanges> {
        let mut delta = DeltaFieldChanges::default();
        let mut position = 0;
        for (&index, &node) in &change.entries {
            delta.push_mark(DeltaMark::skip((index - position) as u32));
            let fields = child_delta(node)?;
            delta.push_mark(DeltaMark {
                count: 1,
                attach: None,
                detach: None,
                fields: (!fields.is_empty()).then_some(fields),
            });
            position = index + 1;
        }
        Ok(delta.finish())
    }

    fn build_child_changes(&self, children: &[(usize, NodeId)]) -> Result<GenericChangeset> {
        Ok(GenericChangeset {
            entries: children.iter().copied().collect(),
        })
    }
}
