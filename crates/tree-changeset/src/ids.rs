//! Identifiers shared by every layer of the changeset algebra.

use std::fmt;

/// Identifies one revision of the linear edit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionTag(pub u64);

impl fmt::Display for RevisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// An identifier unique within a single changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChangesetLocalId(pub u32);

impl ChangesetLocalId {
    #[inline]
    pub fn offset(self, by: u32) -> Self {
        Self(self.0 + by)
    }
}

impl fmt::Display for ChangesetLocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(revision, local id)` pair.
///
/// Untagged changesets use `revision: None`; once a changeset is tagged the
/// pair is unique across the whole history. Ranges of atoms are expressed as
/// a first atom plus a count over consecutive local ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeAtomId {
    pub revision: Option<RevisionTag>,
    pub local_id: ChangesetLocalId,
}

impl ChangeAtomId {
    pub const fn new(revision: Option<RevisionTag>, local_id: ChangesetLocalId) -> Self {
        Self { revision, local_id }
    }

    pub const fn local(id: u32) -> Self {
        Self::new(None, ChangesetLocalId(id))
    }

    pub const fn tagged(revision: RevisionTag, id: u32) -> Self {
        Self::new(Some(revision), ChangesetLocalId(id))
    }

    #[inline]
    pub fn offset(self, by: u32) -> Self {
        Self::new(self.revision, self.local_id.offset(by))
    }

    pub fn with_revision(self, revision: Option<RevisionTag>) -> Self {
        Self::new(revision, self.local_id)
    }

    /// Position of `self` inside the range `[start, start + count)`, if any.
    pub fn offset_in(self, start: ChangeAtomId, count: u32) -> Option<u32> {
        if self.revision != start.revision || self.local_id < start.local_id {
            return None;
        }
        let delta = self.local_id.0 - start.local_id.0;
        (delta < count).then_some(delta)
    }
}

impl fmt::Display for ChangeAtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision {
            Some(rev) => write!(f, "{}:{}", rev.0, self.local_id),
            None => write!(f, "_:{}", self.local_id),
        }
    }
}

/// Identifies the nested changes to one node inside a modular changeset.
pub type NodeId = ChangeAtomId;

/// Hands out fresh local ids above a changeset's `max_id`.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_max_id(max_id: Option<ChangesetLocalId>) -> Self {
        Self {
            next: max_id.map_or(0, |id| id.0 + 1),
        }
    }

    /// Reserves `count` consecutive ids and returns the first.
    pub fn allocate(&mut self, count: u32) -> ChangesetLocalId {
        let id = ChangesetLocalId(self.next);
        self.next += count;
        id
    }

    /// Largest id handed out so far.
    pub fn max_id(&self) -> Option<ChangesetLocalId> {
        self.next.checked_sub(1).map(ChangesetLocalId)
    }
}
