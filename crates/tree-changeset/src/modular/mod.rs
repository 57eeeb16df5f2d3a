//! Modular changesets: one changeset per field, stitched into a document-wide
//! change.
//!
//! [`ModularChangeFamily`] is the entry point for the algebra. It tags its
//! inputs with their revisions, derives the revision metadata the field
//! handlers need and delegates to the per-operation modules below.

mod builder;
mod changeset;
mod compose;
mod config;
mod fixpoint;
mod into_delta;
mod invert;
mod prune;
mod rebase;
mod validate;

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::delta::{DeltaRoot, DetachedNodeId};
use crate::error::{ChangesetError, Result};
use crate::ids::RevisionTag;
use crate::revision::{RevisionInfo, RevisionMetadata, RevisionReplacer, TaggedChange};
use crate::tree::DetachedNodeResolver;

pub use builder::ModularEditBuilder;
pub use changeset::{FieldChangeMap, ModularChangeset, NodeChangeset, NodeExistsConstraint};
pub use config::ChangeFamilyConfig;

#[derive(Debug, Clone, Default)]
pub struct ModularChangeFamily {
    config: ChangeFamilyConfig,
}

impl ModularChangeFamily {
    pub fn new(config: ChangeFamilyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChangeFamilyConfig {
        &self.config
    }

    /// Composes `changes` in order. Changes whose constraints are violated
    /// have no effect and are left out.
    pub fn compose(&self, changes: &[TaggedChange<ModularChangeset>]) -> Result<ModularChangeset> {
        let mut tagged = Vec::with_capacity(changes.len());
        for change in changes {
            let change = self.tag(change)?;
            if change.is_violated() {
                debug!(revision = ?change.revision(), "skipping change with violated constraints");
                continue;
            }
            tagged.push(change);
        }
        let metadata = metadata_of(tagged.iter());
        let mut composed = ModularChangeset::default();
        for change in &tagged {
            composed = compose::compose_pair(&composed, change, &metadata, self.config.max_fixpoint_passes)?;
        }
        trace!(inputs = changes.len(), "composed changes");
        self.finish(prune::prune(&composed)?)
    }

    /// The change that undoes `change`. The result carries no revision; tag
    /// it with [`ModularChangeFamily::change_revision`].
    pub fn invert(&self, change: &TaggedChange<ModularChangeset>, is_rollback: bool) -> Result<ModularChangeset> {
        let change = self.tag(change)?;
        let metadata = metadata_of([&change]);
        let inverse = invert::invert(&change, is_rollback, &metadata, self.config.max_fixpoint_passes)?;
        self.finish(inverse)
    }

    /// Rewrites `change` to apply after `over`, where both were made
    /// against the same document state.
    pub fn rebase(
        &self,
        change: &TaggedChange<ModularChangeset>,
        over: &TaggedChange<ModularChangeset>,
    ) -> Result<ModularChangeset> {
        let change = self.tag(change)?;
        let over = self.tag(over)?;
        let metadata = metadata_of([&over, &change]);
        let rebased = rebase::rebase(&change, &over, &metadata, self.config.max_fixpoint_passes)?;
        self.finish(rebased)
    }

    /// Replaces the revision of every untagged id, and of the change's own
    /// revision, with `revision`.
    pub fn change_revision(
        &self,
        change: &ModularChangeset,
        revision: Option<RevisionTag>,
        rollback_of: Option<RevisionTag>,
    ) -> Result<ModularChangeset> {
        if change.revisions.len() > 1 {
            return Err(ChangesetError::Unsupported("retagging a change made of several revisions"));
        }
        let mut old = BTreeSet::from([None]);
        if let Some(own) = change.revision() {
            old.insert(Some(own));
        }
        let replacer = RevisionReplacer::new(old, revision);
        let replace_map = |map: &FieldChangeMap| -> FieldChangeMap {
            map.iter()
                .map(|(key, field)| (key.clone(), field.replace_revisions(&replacer)))
                .collect()
        };
        let mut retagged = ModularChangeset {
            field_changes: replace_map(&change.field_changes),
            node_changes: change
                .node_changes
                .iter()
                .map(|(&id, node)| {
                    let node = NodeChangeset {
                        field_changes: node.field_changes.as_ref().map(replace_map),
                        node_exists_constraint: node.node_exists_constraint,
                    };
                    (replacer.atom(id), node)
                })
                .collect(),
            max_id: change.max_id,
            revisions: revision
                .map(|revision| vec![RevisionInfo { revision, rollback_of }])
                .unwrap_or_default(),
            builds: change.builds.iter().map(|(&id, trees)| (replacer.atom(id), trees.clone())).collect(),
            destroys: change.destroys.iter().map(|(&id, &count)| (replacer.atom(id), count)).collect(),
            refreshers: change
                .refreshers
                .iter()
                .map(|(&id, content)| (replacer.atom(id), content.clone()))
                .collect(),
            ..ModularChangeset::default()
        };
        retagged.rebuild_indices()?;
        Ok(retagged)
    }

    pub fn prune(&self, change: &ModularChangeset) -> Result<ModularChangeset> {
        prune::prune(change)
    }

    /// The delta `change` applies to the document. A change with violated
    /// constraints has no effect.
    pub fn into_delta(&self, change: &TaggedChange<ModularChangeset>) -> Result<DeltaRoot> {
        into_delta::into_delta(&self.tag(change)?)
    }

    /// Ids of detached content the change needs to be able to apply.
    pub fn relevant_removed_roots(&self, change: &ModularChangeset) -> Result<Vec<DetachedNodeId>> {
        into_delta::relevant_removed_roots(change)
    }

    /// Replaces the refreshers of `change` with exactly the ones it needs,
    /// looking up missing content through `resolver`.
    pub fn update_refreshers(
        &self,
        change: &ModularChangeset,
        resolver: &dyn DetachedNodeResolver,
    ) -> Result<ModularChangeset> {
        into_delta::update_refreshers(change, resolver)
    }

    pub fn validate(&self, change: &ModularChangeset) -> Result<()> {
        validate::validate(change)
    }

    fn tag(&self, change: &TaggedChange<ModularChangeset>) -> Result<ModularChangeset> {
        match change.revision {
            Some(revision) if change.change.revisions.is_empty() => {
                self.change_revision(&change.change, Some(revision), change.rollback_of)
            }
            _ => Ok(change.change.clone()),
        }
    }

    fn finish(&self, change: ModularChangeset) -> Result<ModularChangeset> {
        if self.config.validate_outputs {
            validate::validate(&change)?;
        }
        Ok(change)
    }
}

/// Metadata listing the revisions of `changes` in order.
fn metadata_of<'a>(changes: impl IntoIterator<Item = &'a ModularChangeset>) -> RevisionMetadata {
    let mut infos: Vec<RevisionInfo> = Vec::new();
    for change in changes {
        for info in &change.revisions {
            if !infos.iter().any(|known| known.revision == info.revision) {
                infos.push(*info);
            }
        }
    }
    RevisionMetadata::new(infos)
}
