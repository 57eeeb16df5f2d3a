//! Cross-field coordination.
//!
//! A move touches two places that may live in different fields: the source
//! (where nodes are detached) and the destination (where they are attached).
//! Field handlers exchange information about the two ends through a
//! [`CrossFieldManager`]. Reading a key registers the reading field as a
//! dependent; changing a key marks its dependents invalid so the modular
//! layer re-runs them until nothing changes.

mod range_map;

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

pub use range_map::{RangeMap, RangeQueryResult, RangeValue};

use crate::ids::{ChangeAtomId, ChangesetLocalId, IdAllocator, RevisionTag};
use crate::tree::FieldId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CrossFieldTarget {
    Source,
    Destination,
}

/// A range of cross-field keys sharing a target and revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossFieldKeyRange {
    pub target: CrossFieldTarget,
    pub revision: Option<RevisionTag>,
    pub id: ChangesetLocalId,
    pub count: u32,
}

impl CrossFieldKeyRange {
    pub fn new(target: CrossFieldTarget, atom: ChangeAtomId, count: u32) -> Self {
        Self {
            target,
            revision: atom.revision,
            id: atom.local_id,
            count,
        }
    }
}

pub trait CrossFieldManager<V> {
    /// Reads the value stored for the first cells of `[id, id + count)`.
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        add_dependency: bool,
    ) -> RangeQueryResult<V>;

    /// Stores `value` for `[id, id + count)`. When the stored value changes
    /// and `invalidate_dependents` is set, every field that read the range is
    /// scheduled to run again.
    fn set(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        value: V,
        invalidate_dependents: bool,
    );
}

type RevisionMaps<V> = BTreeMap<(CrossFieldTarget, Option<RevisionTag>), RangeMap<V>>;

/// Shared state behind the per-field managers of one operation.
#[derive(Debug, Clone)]
pub struct CrossFieldTable<V> {
    values: RevisionMaps<V>,
    dependents: RevisionMaps<BTreeSet<FieldId>>,
    invalidated_fields: BTreeSet<FieldId>,
    orphan_keys: Vec<CrossFieldKeyRange>,
}

impl<V> Default for CrossFieldTable<V> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            dependents: BTreeMap::new(),
            invalidated_fields: BTreeSet::new(),
            orphan_keys: Vec::new(),
        }
    }
}

impl<V: RangeValue> CrossFieldTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager that records reads and writes on behalf of `field`.
    pub fn manager(&mut self, field: FieldId) -> FieldCrossFieldManager<'_, V> {
        FieldCrossFieldManager { table: self, field }
    }

    pub fn take_invalidated_fields(&mut self) -> BTreeSet<FieldId> {
        std::mem::take(&mut self.invalidated_fields)
    }

    /// Keys that changed while no field depended on them.
    pub fn take_orphan_keys(&mut self) -> Vec<CrossFieldKeyRange> {
        std::mem::take(&mut self.orphan_keys)
    }

    pub fn invalidate(&mut self, field: FieldId) {
        self.invalidated_fields.insert(field);
    }

    pub fn get(
        &self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
    ) -> RangeQueryResult<V> {
        match self.values.get(&(target, revision)) {
            Some(map) => map.get(id.0, count),
            None => RangeQueryResult {
                value: None,
                length: count,
            },
        }
    }

    fn add_dependency(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        field: &FieldId,
    ) {
        let map = self.dependents.entry((target, revision)).or_default();
        let mut offset = 0;
        while offset < count {
            let start = id.0 + offset;
            let found = map.get(start, count - offset);
            let mut fields = found.value.unwrap_or_default();
            if fields.insert(field.clone()) {
                map.set(start, found.length, fields);
            }
            offset += found.length;
        }
    }

    fn dependents_of(
        &self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
    ) -> BTreeSet<FieldId> {
        let mut result = BTreeSet::new();
        let Some(map) = self.dependents.get(&(target, revision)) else {
            return result;
        };
        let mut offset = 0;
        while offset < count {
            let found = map.get(id.0 + offset, count - offset);
            if let Some(fields) = found.value {
                result.extend(fields);
            }
            offset += found.length;
        }
        result
    }

    /// Stores the value and reports whether anything changed.
    fn store(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        value: V,
    ) -> bool {
        let map = self.values.entry((target, revision)).or_default();
        let previous = map.get(id.0, count);
        let unchanged = previous.length == count && previous.value.as_ref() == Some(&value);
        if !unchanged {
            map.set(id.0, count, value);
        }
        !unchanged
    }
}

/// [`CrossFieldManager`] view of a [`CrossFieldTable`] for one field.
pub struct FieldCrossFieldManager<'a, V> {
    table: &'a mut CrossFieldTable<V>,
    field: FieldId,
}

impl<V: RangeValue> CrossFieldManager<V> for FieldCrossFieldManager<'_, V> {
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        add_dependency: bool,
    ) -> RangeQueryResult<V> {
        if add_dependency {
            self.table
                .add_dependency(target, revision, id, count, &self.field);
        }
        self.table.get(target, revision, id, count)
    }

    fn set(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        value: V,
        invalidate_dependents: bool,
    ) {
        let changed = self.table.store(target, revision, id, count, value);
        if !changed || !invalidate_dependents {
            return;
        }
        let dependents = self.table.dependents_of(target, revision, id, count);
        trace!(field = %self.field, ?target, ?revision, id = id.0, count, dependents = dependents.len(), "cross-field value changed");
        if dependents.is_empty() {
            self.table.orphan_keys.push(CrossFieldKeyRange {
                target,
                revision,
                id,
                count,
            });
        } else {
            self.table.invalidated_fields.extend(dependents);
        }
    }
}

/// Which field owns each cross-field key of a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrossFieldKeyTable {
    entries: BTreeMap<(CrossFieldTarget, Option<RevisionTag>, ChangesetLocalId), (u32, FieldId)>,
}

impl CrossFieldKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, key: CrossFieldKeyRange, field: FieldId) {
        self.entries
            .insert((key.target, key.revision, key.id), (key.count, field));
    }

    /// The field owning the key that covers `id`.
    pub fn get(
        &self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
    ) -> Option<&FieldId> {
        let ((t, r, start), (count, field)) = self
            .entries
            .range(..=(target, revision, id))
            .next_back()?;
        (*t == target && *r == revision && id.0 < start.0 + count).then_some(field)
    }

    /// Every field owning some key overlapping the range.
    pub fn fields_for_range(&self, key: &CrossFieldKeyRange) -> BTreeSet<FieldId> {
        let mut fields = BTreeSet::new();
        if let Some(field) = self.get(key.target, key.revision, key.id) {
            fields.insert(field.clone());
        }
        let end = ChangesetLocalId(key.id.0 + key.count);
        for (_, (_, field)) in self
            .entries
            .range((key.target, key.revision, key.id)..(key.target, key.revision, end))
        {
            fields.insert(field.clone());
        }
        fields
    }

    pub fn iter(&self) -> impl Iterator<Item = (CrossFieldKeyRange, &FieldId)> {
        self.entries
            .iter()
            .map(|(&(target, revision, id), (count, field))| {
                (
                    CrossFieldKeyRange {
                        target,
                        revision,
                        id,
                        count: *count,
                    },
                    field,
                )
            })
    }
}

/// Fresh move ids for an inverse that is not a rollback.
///
/// Each revision's move keys get one contiguous block, so a range keeps
/// its shape however the two ends of a move are split into marks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InverseMoveIds {
    blocks: BTreeMap<Option<RevisionTag>, (ChangesetLocalId, u32, ChangesetLocalId)>,
}

impl InverseMoveIds {
    /// Reserves ids for every move key of `keys` from `allocator`.
    pub fn allocate(keys: &CrossFieldKeyTable, allocator: &mut IdAllocator) -> Self {
        let mut spans: BTreeMap<Option<RevisionTag>, (u32, u32)> = BTreeMap::new();
        for (key, _) in keys.iter() {
            let end = key.id.0 + key.count;
            spans
                .entry(key.revision)
                .and_modify(|(start, last)| {
                    *start = (*start).min(key.id.0);
                    *last = (*last).max(end);
                })
                .or_insert((key.id.0, end));
        }
        let blocks = spans
            .into_iter()
            .map(|(revision, (start, end))| {
                let len = end - start;
                (revision, (ChangesetLocalId(start), len, allocator.allocate(len)))
            })
            .collect();
        Self { blocks }
    }

    /// The untagged id the inverse uses for move `id`.
    pub fn get(&self, id: ChangeAtomId) -> Option<ChangeAtomId> {
        let &(start, len, first) = self.blocks.get(&id.revision)?;
        let offset = id.local_id.0.checked_sub(start.0).filter(|&offset| offset < len)?;
        Some(ChangeAtomId::new(None, first.offset(offset)))
    }
}
