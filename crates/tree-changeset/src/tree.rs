//! Tree addressing: field keys, field ids, up-paths and detached content.

use std::fmt;

use crate::ids::{ChangeAtomId, ChangesetLocalId, NodeId, RevisionTag};

/// Content of a node as stored in the document.
pub type NodeContent = serde_json::Value;

/// Name of a field under a node (or under the document root).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for FieldKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A field inside a modular changeset: `node: None` is the root field map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub node: Option<NodeId>,
    pub field: FieldKey,
}

impl FieldId {
    pub fn new(node: Option<NodeId>, field: FieldKey) -> Self {
        Self { node, field }
    }

    pub fn root(field: impl Into<FieldKey>) -> Self {
        Self::new(None, field.into())
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{node}/{}", self.field),
            None => write!(f, "/{}", self.field),
        }
    }
}

/// Path from a node up to the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpPath {
    pub parent: Option<Box<UpPath>>,
    pub parent_field: FieldKey,
    pub parent_index: usize,
}

impl UpPath {
    pub fn root_child(field: impl Into<FieldKey>, index: usize) -> Self {
        Self {
            parent: None,
            parent_field: field.into(),
            parent_index: index,
        }
    }

    pub fn child(self, field: impl Into<FieldKey>, index: usize) -> Self {
        Self {
            parent: Some(Box::new(self)),
            parent_field: field.into(),
            parent_index: index,
        }
    }
}

/// Path to a field: the node that owns it (if any) plus its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpPath {
    pub parent: Option<UpPath>,
    pub field: FieldKey,
}

impl FieldUpPath {
    pub fn root(field: impl Into<FieldKey>) -> Self {
        Self {
            parent: None,
            field: field.into(),
        }
    }

    pub fn under(parent: UpPath, field: impl Into<FieldKey>) -> Self {
        Self {
            parent: Some(parent),
            field: field.into(),
        }
    }
}

/// Produces the content of nodes removed by an earlier revision.
///
/// Removed content is addressed the way refreshers are: by the revision that
/// detached it and the local id of the first detached node. Node `i` of the
/// result is the node detached as `first_id + i`.
pub trait Reviver {
    fn revive(&self, revision: RevisionTag, first_id: ChangesetLocalId, count: u32) -> Vec<NodeContent>;
}

impl<F> Reviver for F
where
    F: Fn(RevisionTag, ChangesetLocalId, u32) -> Vec<NodeContent>,
{
    fn revive(&self, revision: RevisionTag, first_id: ChangesetLocalId, count: u32) -> Vec<NodeContent> {
        self(revision, first_id, count)
    }
}

/// Looks up the content of a detached node.
pub trait DetachedNodeResolver {
    fn resolve(&self, id: ChangeAtomId) -> Option<NodeContent>;
}

impl<F> DetachedNodeResolver for F
where
    F: Fn(ChangeAtomId) -> Option<NodeContent>,
{
    fn resolve(&self, id: ChangeAtomId) -> Option<NodeContent> {
        self(id)
    }
}
