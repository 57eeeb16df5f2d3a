//! Bookkeeping shared by the operations that walk two changesets at once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::cross_field::{CrossFieldKeyRange, CrossFieldTable};
use crate::error::{ChangesetError, Result};
use crate::ids::NodeId;
use crate::sequence_field::MoveEffect;
use crate::tree::FieldId;

/// Counts re-runs of invalidated fields and stops runaway loops.
#[derive(Debug)]
pub(super) struct Fixpoint {
    passes: usize,
    max_passes: usize,
}

impl Fixpoint {
    pub fn new(max_passes: usize) -> Self {
        Self {
            passes: 0,
            max_passes,
        }
    }

    /// Fields to run again, or `None` once the table is settled.
    ///
    /// Keys written before any field read them are resolved to their
    /// owners through `owners`; owners that already ran are re-run.
    pub fn next_pass(
        &mut self,
        table: &mut CrossFieldTable<MoveEffect>,
        mut owners: impl FnMut(&CrossFieldKeyRange) -> BTreeSet<FieldId>,
        processed: impl Fn(&FieldId) -> bool,
    ) -> Result<Option<BTreeSet<FieldId>>> {
        for key in table.take_orphan_keys() {
            for field in owners(&key) {
                if processed(&field) {
                    table.invalidate(field);
                }
            }
        }
        let invalid = table.take_invalidated_fields();
        if invalid.is_empty() {
            return Ok(None);
        }
        self.passes += 1;
        if self.passes > self.max_passes {
            return Err(ChangesetError::FixpointDidNotConverge {
                passes: self.max_passes,
            });
        }
        debug!(pass = self.passes, fields = invalid.len(), "re-running invalidated fields");
        Ok(Some(invalid))
    }
}

/// Output nodes and the input nodes they are made from. The first input
/// side names the output node when present.
#[derive(Debug, Default)]
pub(super) struct NodePairs {
    pairs: BTreeMap<NodeId, (Option<NodeId>, Option<NodeId>)>,
    first_to_out: BTreeMap<NodeId, NodeId>,
    second_to_out: BTreeMap<NodeId, NodeId>,
    pending: VecDeque<NodeId>,
}

impl NodePairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pair and returns its output id. Pairs that are new or
    /// gained a side are queued for processing.
    pub fn record(&mut self, first: Option<NodeId>, second: Option<NodeId>) -> Result<NodeId> {
        let out = first.or(second).ok_or_else(|| {
            ChangesetError::InvariantViolation("child change with neither side present".into())
        })?;
        let merged = match self.pairs.get(&out) {
            None => (first, second),
            Some(&(a, b)) => (merge_side(a, first)?, merge_side(b, second)?),
        };
        if self.pairs.get(&out) != Some(&merged) {
            self.pairs.insert(out, merged);
            self.pending.push_back(out);
        }
        if let Some(first) = merged.0 {
            self.first_to_out.insert(first, out);
        }
        if let Some(second) = merged.1 {
            self.second_to_out.insert(second, out);
        }
        Ok(out)
    }

    pub fn requeue(&mut self, out: NodeId) {
        self.pending.push_back(out);
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.pending.pop_front()
    }

    pub fn get(&self, out: NodeId) -> Option<(Option<NodeId>, Option<NodeId>)> {
        self.pairs.get(&out).copied()
    }

    pub fn out_of_first(&self, id: NodeId) -> Option<NodeId> {
        self.first_to_out.get(&id).copied()
    }

    pub fn out_of_second(&self, id: NodeId) -> Option<NodeId> {
        self.second_to_out.get(&id).copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = (NodeId, (Option<NodeId>, Option<NodeId>))> + '_ {
        self.pairs.iter().map(|(&out, &pair)| (out, pair))
    }
}

fn merge_side(existing: Option<NodeId>, incoming: Option<NodeId>) -> Result<Option<NodeId>> {
    match (existing, incoming) {
        (Some(a), Some(b)) if a != b => Err(ChangesetError::InvariantViolation(format!(
            "nodes {a} and {b} both claim the same child position"
        ))),
        (a, b) => Ok(a.or(b)),
    }
}

/// Maps a field of an input changeset to the output field it feeds.
pub(super) fn map_field(field: &FieldId, node_map: impl Fn(NodeId) -> Option<NodeId>) -> Option<FieldId> {
    match field.node {
        None => Some(field.clone()),
        Some(node) => Some(FieldId::new(Some(node_map(node)?), field.field.clone())),
    }
}
