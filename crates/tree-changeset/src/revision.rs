//! Revision metadata and tagged changes.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::ids::{ChangeAtomId, RevisionTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: RevisionTag,
    /// Set when this revision undoes `rollback_of`.
    pub rollback_of: Option<RevisionTag>,
}

impl RevisionInfo {
    pub fn new(revision: RevisionTag) -> Self {
        Self {
            revision,
            rollback_of: None,
        }
    }
}

/// Answers ordering questions about the revisions involved in an operation.
pub trait RevisionMetadataSource {
    /// Position of `revision` in the sequence of revisions being operated on.
    fn get_index(&self, revision: Option<RevisionTag>) -> Option<usize>;

    fn try_get_info(&self, revision: Option<RevisionTag>) -> Option<&RevisionInfo>;

    /// True when some known revision is the rollback of `revision`.
    fn has_rollback(&self, revision: RevisionTag) -> bool;
}

/// Revision metadata backed by an ordered list of [`RevisionInfo`].
#[derive(Debug, Clone, Default)]
pub struct RevisionMetadata {
    infos: Vec<RevisionInfo>,
}

impl RevisionMetadata {
    pub fn new(infos: Vec<RevisionInfo>) -> Self {
        Self { infos }
    }

    pub fn infos(&self) -> &[RevisionInfo] {
        &self.infos
    }
}

impl RevisionMetadataSource for RevisionMetadata {
    fn get_index(&self, revision: Option<RevisionTag>) -> Option<usize> {
        let revision = revision?;
        self.infos.iter().position(|info| info.revision == revision)
    }

    fn try_get_info(&self, revision: Option<RevisionTag>) -> Option<&RevisionInfo> {
        let revision = revision?;
        self.infos.iter().find(|info| info.revision == revision)
    }

    fn has_rollback(&self, revision: RevisionTag) -> bool {
        self.infos
            .iter()
            .any(|info| info.rollback_of == Some(revision))
    }
}

/// Orders two revisions by age. Unknown revisions count as the oldest.
pub fn compare_revision_age(
    metadata: &dyn RevisionMetadataSource,
    a: Option<RevisionTag>,
    b: Option<RevisionTag>,
) -> Ordering {
    match (metadata.get_index(a), metadata.get_index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A change paired with the revision it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedChange<T> {
    pub revision: Option<RevisionTag>,
    pub rollback_of: Option<RevisionTag>,
    pub change: T,
}

impl<T> TaggedChange<T> {
    pub fn new(change: T, revision: RevisionTag) -> Self {
        Self {
            revision: Some(revision),
            rollback_of: None,
            change,
        }
    }

    pub fn untagged(change: T) -> Self {
        Self {
            revision: None,
            rollback_of: None,
            change,
        }
    }

    pub fn rollback(change: T, revision: RevisionTag, rollback_of: RevisionTag) -> Self {
        Self {
            revision: Some(revision),
            rollback_of: Some(rollback_of),
            change,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaggedChange<U> {
        TaggedChange {
            revision: self.revision,
            rollback_of: self.rollback_of,
            change: f(self.change),
        }
    }
}

/// Rewrites every revision in `old` to `new`.
#[derive(Debug, Clone)]
pub struct RevisionReplacer {
    old: BTreeSet<Option<RevisionTag>>,
    new: Option<RevisionTag>,
}

impl RevisionReplacer {
    pub fn new(old: BTreeSet<Option<RevisionTag>>, new: Option<RevisionTag>) -> Self {
        Self { old, new }
    }

    pub fn revision(&self, revision: Option<RevisionTag>) -> Option<RevisionTag> {
        if self.old.contains(&revision) {
            self.new
        } else {
            revision
        }
    }

    pub fn atom(&self, atom: ChangeAtomId) -> ChangeAtomId {
        atom.with_revision(self.revision(atom.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RevisionMetadata {
        RevisionMetadata::new(vec![
            RevisionInfo::new(RevisionTag(7)),
            RevisionInfo {
                revision: RevisionTag(9),
                rollback_of: Some(RevisionTag(7)),
            },
        ])
    }

    #[test]
    fn index_and_rollback_lookup() {
        let meta = meta();
        assert_eq!(meta.get_index(Some(RevisionTag(9))), Some(1));
        assert_eq!(meta.get_index(None), None);
        assert!(meta.has_rollback(RevisionTag(7)));
        assert!(!meta.has_rollback(RevisionTag(9)));
    }

    #[test]
    fn unknown_revisions_are_oldest() {
        let meta = meta();
        assert_eq!(
            compare_revision_age(&meta, Some(RevisionTag(7)), Some(RevisionTag(9))),
            Ordering::Less
        );
        assert_eq!(
            compare_revision_age(&meta, None, Some(RevisionTag(7))),
            Ordering::Less
        );
        assert_eq!(compare_revision_age(&meta, None, None), Ordering::Equal);
    }

    #[test]
    fn replacer_rewrites_only_listed_revisions() {
        let replacer = RevisionReplacer::new(
            [None, Some(RevisionTag(1))].into_iter().collect(),
            Some(RevisionTag(5)),
        );
        assert_eq!(
            replacer.atom(ChangeAtomId::local(2)),
            ChangeAtomId::tagged(RevisionTag(5), 2)
        );
        assert_eq!(
            replacer.atom(ChangeAtomId::tagged(RevisionTag(2), 2)),
            ChangeAtomId::tagged(RevisionTag(2), 2)
        );
    }
}
