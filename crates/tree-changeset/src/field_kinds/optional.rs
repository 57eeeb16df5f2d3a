//! Optional field kind: a field holding zero or one node.
//!
//! Content is addressed by register: [`RegisterId::SelfRegister`] is the node
//! currently in the field, [`RegisterId::Detached`] is detached content. A
//! [`Replace`] detaches the current content (unless the field is empty) and
//! optionally attaches content from a detached register.

use std::collections::BTreeMap;

use crate::cross_field::CrossFieldKeyRange;
use crate::delta::{
    DeltaDetachedNodeChanges, DeltaDetachedNodeRename, DeltaFieldChanges, DeltaMark,
    DetachedNodeId,
};
use crate::error::{fail, ChangesetError, Result};
use crate::ids::{ChangeAtomId, NodeId};
use crate::revision::RevisionReplacer;

use super::{
    ChildDelta, ChildRemovedRoots, ComposeChild, FieldChangeHandler, FieldContext,
    FieldKindIdentifier, NodeExistenceState, PruneChild, RebaseChild,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterId {
    SelfRegister,
    Detached(ChangeAtomId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replace {
    /// The field is empty in the input context.
    pub is_empty: bool,
    /// Detached content to attach, or `None` to leave the field empty.
    pub src: Option<ChangeAtomId>,
    /// Where the current content goes. Unused when `is_empty`.
    pub dst: ChangeAtomId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionalChangeset {
    pub value_replace: Option<Replace>,
    /// Child changes keyed by register in the input context.
    pub child_changes: BTreeMap<RegisterId, NodeId>,
    /// Detached content that changes id: `(from, to)`.
    pub renames: Vec<(ChangeAtomId, ChangeAtomId)>,
}

impl OptionalChangeset {
    /// Fills the field with the detached (or freshly built) content `src`.
    pub fn set(was_empty: bool, src: ChangeAtomId, dst: ChangeAtomId) -> Self {
        Self {
            value_replace: Some(Replace {
                is_empty: was_empty,
                src: Some(src),
                dst,
            }),
            ..Self::default()
        }
    }

    /// Detaches the current content into `dst`.
    pub fn clear(was_empty: bool, dst: ChangeAtomId) -> Self {
        Self {
            value_replace: Some(Replace {
                is_empty: was_empty,
                src: None,
                dst,
            }),
            ..Self::default()
        }
    }

    pub fn child_change(node: NodeId) -> Self {
        let mut change = Self::default();
        change.child_changes.insert(RegisterId::SelfRegister, node);
        change
    }

    fn renamed_to(&self, id: ChangeAtomId) -> Option<ChangeAtomId> {
        self.renames
            .iter()
            .find(|(from, _)| *from == id)
            .map(|(_, to)| *to)
    }

    fn renamed_from(&self, id: ChangeAtomId) -> Option<ChangeAtomId> {
        self.renames
            .iter()
            .find(|(_, to)| *to == id)
            .map(|(from, _)| *from)
    }

    /// Maps a register of the output context back to the input context.
    fn input_register(&self, output: RegisterId) -> Result<RegisterId> {
        Ok(match output {
            RegisterId::SelfRegister => match self.value_replace {
                Some(Replace { src: Some(src), .. }) => RegisterId::Detached(src),
                Some(Replace { src: None, .. }) => fail!("child change targets a cleared field"),
                None => RegisterId::SelfRegister,
            },
            RegisterId::Detached(id) => match self.value_replace {
                Some(r) if !r.is_empty && r.dst == id => RegisterId::SelfRegister,
                _ => RegisterId::Detached(self.renamed_from(id).unwrap_or(id)),
            },
        })
    }

    /// Maps a register of the input context to the output context.
    fn output_register(&self, input: RegisterId) -> RegisterId {
        match input {
            RegisterId::SelfRegister => match self.value_replace {
                Some(r) if !r.is_empty => RegisterId::Detached(r.dst),
                _ => RegisterId::SelfRegister,
            },
            RegisterId::Detached(id) => match self.value_replace {
                Some(r) if r.src == Some(id) => RegisterId::SelfRegister,
                _ => RegisterId::Detached(self.renamed_to(id).unwrap_or(id)),
            },
        }
    }
}

fn push_rename(renames: &mut Vec<(ChangeAtomId, ChangeAtomId)>, from: ChangeAtomId, to: ChangeAtomId) {
    if from != to {
        renames.push((from, to));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptionalFieldHandler;

impl FieldChangeHandler for OptionalFieldHandler {
    type Changeset = OptionalChangeset;

    const KIND: FieldKindIdentifier = FieldKindIdentifier::Optional;

    fn compose(
        &self,
        change1: &OptionalChangeset,
        change2: &OptionalChangeset,
        compose_child: ComposeChild<'_>,
        _cx: &mut FieldContext<'_>,
    ) -> Result<OptionalChangeset> {
        let mut pairs: BTreeMap<RegisterId, (Option<NodeId>, Option<NodeId>)> = BTreeMap::new();
        for (&register, &node) in &change1.child_changes {
            pairs.entry(register).or_default().0 = Some(node);
        }
        for (&register, &node) in &change2.child_changes {
            let slot = pairs.entry(change1.input_register(register)?).or_default();
            if slot.1.is_some() {
                fail!("two child changes map to register {register:?}");
            }
            slot.1 = Some(node);
        }
        let mut child_changes = BTreeMap::new();
        for (register, (a, b)) in pairs {
            child_changes.insert(register, compose_child(a, b)?);
        }

        let mut renames = Vec::new();
        let mut consumed = Vec::new();
        for &(from, to) in &change1.renames {
            match change2.renamed_to(to) {
                Some(next) => {
                    consumed.push(to);
                    push_rename(&mut renames, from, next);
                }
                None => push_rename(&mut renames, from, to),
            }
        }
        for &(from, to) in &change2.renames {
            if !consumed.contains(&from) {
                push_rename(&mut renames, from, to);
            }
        }

        let value_replace = match (change1.value_replace, change2.value_replace) {
            (None, None) => None,
            (Some(r), None) => Some(r),
            (None, Some(r)) => Some(Replace {
                src: r.src.map(|src| change1.renamed_from(src).unwrap_or(src)),
                ..r
            }),
            (Some(first), Some(second)) => {
                if let Some(attached) = first.src {
                    if second.is_empty {
                        fail!("field filled by the first change is empty for the second");
                    }
                    push_rename(&mut renames, attached, second.dst);
                }
                let src = match second.src {
                    None => None,
                    Some(src) => match change1.input_register(RegisterId::Detached(src))? {
                        RegisterId::SelfRegister => Some(first.dst),
                        RegisterId::Detached(id) => Some(id),
                    },
                };
                if !first.is_empty && src == Some(first.dst) {
                    None
                } else {
                    Some(Replace {
                        is_empty: first.is_empty,
                        src,
                        dst: first.dst,
                    })
                }
            }
        };

        Ok(OptionalChangeset {
            value_replace,
            child_changes,
            renames,
        })
    }

    fn invert(
        &self,
        change: &OptionalChangeset,
        is_rollback: bool,
        cx: &mut FieldContext<'_>,
    ) -> Result<OptionalChangeset> {
        let value_replace = change.value_replace.map(|r| Replace {
            is_empty: r.src.is_none(),
            src: (!r.is_empty).then_some(r.dst),
            dst: match r.src {
                Some(src) if is_rollback => src,
                _ => ChangeAtomId::new(None, cx.id_allocator.allocate(1)),
            },
        });
        let child_changes = change
            .child_changes
            .iter()
            .map(|(&register, &node)| (change.output_register(register), node))
            .collect();
        let renames = change.renames.iter().rev().map(|&(from, to)| (to, from)).collect();
        Ok(OptionalChangeset {
            value_replace,
            child_changes,
            renames,
        })
    }

    fn rebase(
        &self,
        change: &OptionalChangeset,
        over: &OptionalChangeset,
        rebase_child: RebaseChild<'_>,
        _cx: &mut FieldContext<'_>,
        existence: NodeExistenceState,
    ) -> Result<OptionalChangeset> {
        let state_of = |register: RegisterId| match register {
            RegisterId::SelfRegister => existence,
            RegisterId::Detached(_) => NodeExistenceState::Dead,
        };

        let mut child_changes = BTreeMap::new();
        for (&register, &node) in &change.child_changes {
            let rebased_register = over.output_register(register);
            let base = over.child_changes.get(&register).copied();
            if let Some(rebased) = rebase_child(Some(node), base, state_of(rebased_register))? {
                child_changes.insert(rebased_register, rebased);
            }
        }
        for (&register, &base) in &over.child_changes {
            if change.child_changes.contains_key(&register) {
                continue;
            }
            let rebased_register = over.output_register(register);
            if let Some(rebased) = rebase_child(None, Some(base), state_of(rebased_register))? {
                child_changes.insert(rebased_register, rebased);
            }
        }

        let follow = |id: ChangeAtomId| over.renamed_to(id).unwrap_or(id);
        let value_replace = match (change.value_replace, over.value_replace) {
            (None, _) => None,
            (Some(r), None) => Some(Replace {
                src: r.src.map(follow),
                ..r
            }),
            (Some(r), Some(base)) => {
                if r.src.is_some() && r.src == base.src {
                    return Err(ChangesetError::Unsupported(
                        "concurrent replacements attaching the same content",
                    ));
                }
                Some(Replace {
                    is_empty: base.src.is_none(),
                    src: r.src.map(follow),
                    dst: r.dst,
                })
            }
        };

        let mut renames = Vec::new();
        for &(from, to) in &change.renames {
            let attached_by_base = over.value_replace.is_some_and(|r| r.src == Some(from));
            if !attached_by_base {
                push_rename(&mut renames, follow(from), to);
            }
        }

        Ok(OptionalChangeset {
            value_replace,
            child_changes,
            renames,
        })
    }

    fn prune(
        &self,
        change: &OptionalChangeset,
        prune_child: PruneChild<'_>,
    ) -> Result<OptionalChangeset> {
        let mut child_changes = BTreeMap::new();
        for (&register, &node) in &change.child_changes {
            if let Some(pruned) = prune_child(node)? {
                child_changes.insert(register, pruned);
            }
        }
        Ok(OptionalChangeset {
            value_replace: change.value_replace,
            child_changes,
            renames: change.renames.clone(),
        })
    }

    fn is_empty(&self, change: &OptionalChangeset) -> bool {
        change.value_replace.is_none() && change.child_changes.is_empty() && change.renames.is_empty()
    }

    fn relevant_removed_roots(
        &self,
        change: &OptionalChangeset,
        from_child: ChildRemovedRoots<'_>,
    ) -> Result<Vec<DetachedNodeId>> {
        let mut roots = Vec::new();
        if let Some(Replace { src: Some(src), .. }) = change.value_replace {
            roots.push(src);
        }
        for (&register, &node) in &change.child_changes {
            if let RegisterId::Detached(id) = register {
                if !roots.contains(&id) {
                    roots.push(id);
                }
            }
            roots.extend(from_child(node)?);
        }
        Ok(roots)
    }

    fn cross_field_keys(&self, _change: &OptionalChangeset) -> Vec<CrossFieldKeyRange> {
        Vec::new()
    }

    fn nested_changes(&self, change: &OptionalChangeset) -> Vec<NodeId> {
        change.child_changes.values().copied().collect()
    }

    fn replace_revisions(
        &self,
        change: &OptionalChangeset,
        replacer: &RevisionReplacer,
    ) -> OptionalChangeset {
        let register = |r: RegisterId| match r {
            RegisterId::SelfRegister => RegisterId::SelfRegister,
            RegisterId::Detached(id) => RegisterId::Detached(replacer.atom(id)),
        };
        OptionalChangeset {
            value_replace: change.value_replace.map(|r| Replace {
                is_empty: r.is_empty,
                src: r.src.map(|id| replacer.atom(id)),
                dst: replacer.atom(r.dst),
            }),
            child_changes: change
                .child_changes
                .iter()
                .map(|(&r, &node)| (register(r), replacer.atom(node)))
                .collect(),
            renames: change
                .renames
                .iter()
                .map(|&(from, to)| (replacer.atom(from), replacer.atom(to)))
                .collect(),
        }
    }

    fn into_delta(
        &self,
        change: &OptionalChangeset,
        child_delta: ChildDelta<'_>,
    ) -> Result<DeltaFieldChanges> {
        let mut delta = DeltaFieldChanges::default();
        let mut own_fields = None;
        for (&register, &node) in &change.child_changes {
            let fields = child_delta(node)?;
            if fields.is_empty() {
                continue;
            }
            match register {
                RegisterId::SelfRegister => own_fields = Some(fields),
                RegisterId::Detached(id) => delta.global.push(DeltaDetachedNodeChanges { id, fields }),
            }
        }
        match change.value_replace {
            Some(r) => delta.push_mark(DeltaMark {
                count: 1,
                attach: r.src,
                detach: (!r.is_empty).then_some(r.dst),
                fields: own_fields,
            }),
            None => delta.push_mark(DeltaMark {
                count: 1,
                attach: None,
                detach: None,
                fields: own_fields,
            }),
        }
        for &(old_id, new_id) in &change.renames {
            delta.rename.push(DeltaDetachedNodeRename {
                count: 1,
                old_id,
                new_id,
            });
        }
        Ok(delta.finish())
    }

    fn build_child_changes(&self, children: &[(usize, NodeId)]) -> Result<OptionalChangeset> {
        let mut change = OptionalChangeset::default();
        for &(index, node) in children {
            if index != 0 {
                return Err(ChangesetError::InvalidEdit(format!(
                    "optional field has no child at index {index}"
                )));
            }
            change.child_changes.insert(RegisterId::SelfRegister, node);
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_field::CrossFieldTable;
    use crate::ids::IdAllocator;
    use crate::revision::RevisionMetadata;
    use crate::sequence_field::MoveEffect;
    use crate::tree::FieldId;

    fn atom(id: u32) -> ChangeAtomId {
        ChangeAtomId::local(id)
    }

    fn with_cx<T>(start: u32, f: impl FnOnce(&mut FieldContext<'_>) -> T) -> T {
        let mut alloc = IdAllocator::from_max_id(Some(crate::ids::ChangesetLocalId(start)));
        let mut table = CrossFieldTable::<MoveEffect>::new();
        let mut manager = table.manager(FieldId::root("opt"));
        let meta = RevisionMetadata::default();
        let mut cx = FieldContext {
            id_allocator: &mut alloc,
            cross_field: &mut manager,
            metadata: &meta,
            inverse_move_ids: None,
        };
        f(&mut cx)
    }

    #[test]
    fn compose_set_then_clear_renames_built_content() {
        let set = OptionalChangeset::set(false, atom(1), atom(2));
        let clear = OptionalChangeset::clear(false, atom(3));
        let composed = with_cx(10, |cx| {
            OptionalFieldHandler.compose(&set, &clear, &mut |a, b| Ok(a.or(b).unwrap()), cx)
        })
        .unwrap();
        assert_eq!(
            composed.value_replace,
            Some(Replace {
                is_empty: false,
                src: None,
                dst: atom(2)
            })
        );
        assert_eq!(composed.renames, vec![(atom(1), atom(3))]);
    }

    #[test]
    fn compose_with_own_rollback_is_empty() {
        let set = OptionalChangeset::set(false, atom(1), atom(2));
        let undo = with_cx(10, |cx| OptionalFieldHandler.invert(&set, true, cx)).unwrap();
        assert_eq!(
            undo.value_replace,
            Some(Replace {
                is_empty: false,
                src: Some(atom(2)),
                dst: atom(1)
            })
        );
        let composed = with_cx(10, |cx| {
            OptionalFieldHandler.compose(&set, &undo, &mut |a, b| Ok(a.or(b).unwrap()), cx)
        })
        .unwrap();
        assert!(OptionalFieldHandler.is_empty(&composed));
    }

    #[test]
    fn child_change_follows_attached_content_in_compose() {
        let set = OptionalChangeset::set(true, atom(1), atom(2));
        let edit = OptionalChangeset::child_change(atom(7));
        let composed = with_cx(10, |cx| {
            OptionalFieldHandler.compose(&set, &edit, &mut |a, b| Ok(a.or(b).unwrap()), cx)
        })
        .unwrap();
        assert_eq!(
            composed.child_changes.get(&RegisterId::Detached(atom(1))),
            Some(&atom(7))
        );
    }

    #[test]
    fn rebase_child_change_over_clear_marks_node_dead() {
        let edit = OptionalChangeset::child_change(atom(7));
        let clear = OptionalChangeset::clear(false, atom(3));
        let mut seen = Vec::new();
        let rebased = with_cx(10, |cx| {
            OptionalFieldHandler.rebase(
                &edit,
                &clear,
                &mut |n, _, state| {
                    seen.push(state);
                    Ok(n)
                },
                cx,
                NodeExistenceState::Alive,
            )
        })
        .unwrap();
        assert_eq!(seen, vec![NodeExistenceState::Dead]);
        assert_eq!(
            rebased.child_changes.get(&RegisterId::Detached(atom(3))),
            Some(&atom(7))
        );
    }

    #[test]
    fn concurrent_sets_replace_the_winner() {
        let mine = OptionalChangeset::set(false, atom(1), atom(2));
        let theirs = OptionalChangeset::set(false, atom(5), atom(6));
        let rebased = with_cx(10, |cx| {
            OptionalFieldHandler.rebase(&mine, &theirs, &mut |n, _, _| Ok(n), cx, NodeExistenceState::Alive)
        })
        .unwrap();
        assert_eq!(
            rebased.value_replace,
            Some(Replace {
                is_empty: false,
                src: Some(atom(1)),
                dst: atom(2)
            })
        );
    }

    #[test]
    fn concurrent_revives_of_the_same_content_are_unsupported() {
        let mine = OptionalChangeset::set(false, atom(1), atom(2));
        let theirs = OptionalChangeset::set(false, atom(1), atom(6));
        let rebased = with_cx(10, |cx| {
            OptionalFieldHandler.rebase(&mine, &theirs, &mut |n, _, _| Ok(n), cx, NodeExistenceState::Alive)
        });
        assert!(matches!(rebased, Err(ChangesetError::Unsupported(_))));
    }

    #[test]
    fn delta_for_replace() {
        let set = OptionalChangeset::set(false, atom(1), atom(2));
        let delta = OptionalFieldHandler
            .into_delta(&set, &mut |_| Ok(Default::default()))
            .unwrap();
        assert_eq!(
            delta.local,
            vec![DeltaMark {
                count: 1,
                attach: Some(atom(1)),
                detach: Some(atom(2)),
                fields: None
            }]
        );
    }

    #[test]
    fn only_index_zero_converts() {
        assert!(OptionalFieldHandler.build_child_changes(&[(0, atom(1))]).is_ok());
        assert!(matches!(
            OptionalFieldHandler.build_child_changes(&[(1, atom(1))]),
            Err(ChangesetError::InvalidEdit(_))
        ));
    }
}
