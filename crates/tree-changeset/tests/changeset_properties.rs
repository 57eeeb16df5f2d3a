mod common;

use proptest::prelude::*;
use serde_json::json;

use common::document::Document;
use common::{family, rev, tagged};
use tree_changeset::modular::ModularChangeset;
use tree_changeset::{ChangesetError, FieldUpPath, ModularEditBuilder, TaggedChange, UpPath};

const ITEMS: &str = "items";
const OTHER: &str = "other";

/// Ends the case early when the engine reports an unsupported combination.
macro_rules! or_skip {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(ChangesetError::Unsupported(_)) => return Ok(()),
            Err(err) => return Err(TestCaseError::fail(err.to_string())),
        }
    };
}

#[derive(Debug, Clone)]
enum Edit {
    Insert { at: u8, count: u8 },
    Delete { at: u8, count: u8 },
    Move { from: u8, count: u8, to: u8 },
    MoveToOther { from: u8, count: u8, to: u8 },
    /// Inserts into the `tags` field under an item.
    Tag { node: u8 },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<u8>(), 1u8..4).prop_map(|(at, count)| Edit::Insert { at, count }),
        (any::<u8>(), 1u8..4).prop_map(|(at, count)| Edit::Delete { at, count }),
        (any::<u8>(), 1u8..3, any::<u8>()).prop_map(|(from, count, to)| Edit::Move { from, count, to }),
        (any::<u8>(), 1u8..3, any::<u8>()).prop_map(|(from, count, to)| Edit::MoveToOther { from, count, to }),
        any::<u8>().prop_map(|node| Edit::Tag { node }),
    ]
}

fn edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit(), 1..3)
}

fn base() -> Document {
    Document::default()
        .with_field(ITEMS, (0..4).map(|i| json!(format!("i{i}"))))
        .with_field(OTHER, [json!("o0")])
}

/// A range of at most `count` nodes starting inside a field of `len` nodes.
fn range(at: u8, count: u8, len: usize) -> (usize, usize) {
    let index = at as usize % len;
    (index, (count as usize).min(len - index))
}

/// Builds `edits` against `doc`, clamping each one to the field lengths the
/// edits before it leave. Inserted values start with `label`.
fn build(edits: &[Edit], doc: &Document, label: &str) -> tree_changeset::Result<ModularChangeset> {
    let (items, other) = (FieldUpPath::root(ITEMS), FieldUpPath::root(OTHER));
    let (mut len, mut other_len) = (doc.len(ITEMS), doc.len(OTHER));
    let mut values = (0..).map(|n| json!(format!("{label}{n}")));
    let mut builder = ModularEditBuilder::with_family(family());
    for edit in edits {
        match *edit {
            Edit::Insert { at, count } => {
                let index = at as usize % (len + 1);
                builder.sequence_insert(&items, index, values.by_ref().take(count as usize).collect())?;
                len += count as usize;
            }
            Edit::Delete { at, count } if len > 0 => {
                let (index, count) = range(at, count, len);
                builder.sequence_delete(&items, index, count as u32)?;
                len -= count;
            }
            Edit::Move { from, count, to } if len > 0 => {
                let (src, count) = range(from, count, len);
                // Destinations that would leave the range in place are never picked.
                if len > count {
                    let k = to as usize % (len - count);
                    let dst = if k < src { k } else { src + count + 1 + (k - src) };
                    builder.sequence_move(&items, src, count as u32, dst)?;
                }
            }
            Edit::MoveToOther { from, count, to } if len > 0 => {
                let (src, count) = range(from, count, len);
                let dst = to as usize % (other_len + 1);
                builder.move_across_fields(&items, src, count as u32, &other, dst)?;
                len -= count;
                other_len += count;
            }
            Edit::Tag { node } if len > 0 => {
                let tags = FieldUpPath::under(UpPath::root_child(ITEMS, node as usize % len), "tags");
                builder.sequence_insert(&tags, 0, values.by_ref().take(1).collect())?;
            }
            _ => {}
        }
    }
    builder.take_change()
}

fn apply(doc: &Document, change: &TaggedChange<ModularChangeset>) -> Result<Document, TestCaseError> {
    let delta = family()
        .into_delta(change)
        .map_err(|err| TestCaseError::fail(err.to_string()))?;
    doc.applied(&delta).map_err(TestCaseError::fail)
}

proptest! {
    #[test]
    fn prune_is_idempotent(edits in prop::collection::vec(edit(), 0..6)) {
        let family = family();
        let change = or_skip!(build(&edits, &base(), "a"));
        let once = family.prune(&change).unwrap();
        prop_assert_eq!(family.prune(&once).unwrap(), once);
    }

    #[test]
    fn composing_with_empty_changes_nothing(edits in prop::collection::vec(edit(), 0..6)) {
        let family = family();
        let change = or_skip!(build(&edits, &base(), "a"));
        let alone = family.compose(&[tagged(&change, 1)]).unwrap();
        let padded = family
            .compose(&[tagged(&change, 1), TaggedChange::untagged(ModularChangeset::default())])
            .unwrap();
        prop_assert_eq!(padded, alone);
    }

    #[test]
    fn single_edit_then_rollback_is_empty(op in edit()) {
        let family = family();
        let change = or_skip!(build(&[op], &base(), "a"));
        let inverse = or_skip!(family.invert(&tagged(&change, 1), true));
        let rollback = family.change_revision(&inverse, Some(rev(2)), Some(rev(1))).unwrap();
        let composed = or_skip!(family.compose(&[tagged(&change, 1), TaggedChange::untagged(rollback)]));
        prop_assert!(composed.is_empty(), "left over: {:?}", composed);
    }

    #[test]
    fn inverse_restores_the_document(ops in edits()) {
        let family = family();
        let base = base();
        let change = or_skip!(build(&ops, &base, "a"));
        let edited = apply(&base, &tagged(&change, 1))?;
        let inverse = or_skip!(family.invert(&tagged(&change, 1), false));
        let restored = apply(&edited, &tagged(&inverse, 2))?;
        prop_assert_eq!(restored.snapshot(), base.snapshot());
    }

    #[test]
    fn compose_is_associative(a in edits(), b in edits(), c in edits()) {
        let family = family();
        let base = base();
        let a = or_skip!(build(&a, &base, "a"));
        let after_a = apply(&base, &tagged(&a, 1))?;
        let b = or_skip!(build(&b, &after_a, "b"));
        let after_b = apply(&after_a, &tagged(&b, 2))?;
        let c = or_skip!(build(&c, &after_b, "c"));
        let after_c = apply(&after_b, &tagged(&c, 3))?;

        let ab = or_skip!(family.compose(&[tagged(&a, 1), tagged(&b, 2)]));
        let left = or_skip!(family.compose(&[TaggedChange::untagged(ab), tagged(&c, 3)]));
        let bc = or_skip!(family.compose(&[tagged(&b, 2), tagged(&c, 3)]));
        let right = or_skip!(family.compose(&[tagged(&a, 1), TaggedChange::untagged(bc)]));

        let left = apply(&base, &TaggedChange::untagged(left))?;
        let right = apply(&base, &TaggedChange::untagged(right))?;
        prop_assert_eq!(left.snapshot(), right.snapshot());
        prop_assert_eq!(left.snapshot(), after_c.snapshot());
    }

    #[test]
    fn undo_then_rebased_redo_matches_rebase(a in edits(), b in edits()) {
        let family = family();
        let base = base();
        let a = or_skip!(build(&a, &base, "a"));
        let b = or_skip!(build(&b, &base, "b"));

        let rebased = or_skip!(family.rebase(&tagged(&a, 1), &tagged(&b, 2)));
        let rebased = family.change_revision(&rebased, Some(rev(4)), None).unwrap();
        let inverse = or_skip!(family.invert(&tagged(&a, 1), true));
        let rollback = family.change_revision(&inverse, Some(rev(3)), Some(rev(1))).unwrap();
        let undo_redo = or_skip!(family.compose(&[
            TaggedChange::untagged(rollback),
            tagged(&b, 2),
            TaggedChange::untagged(rebased.clone()),
        ]));

        let left = apply(&apply(&base, &tagged(&a, 1))?, &TaggedChange::untagged(undo_redo))?;
        let right = apply(&apply(&base, &tagged(&b, 2))?, &TaggedChange::untagged(rebased))?;
        prop_assert_eq!(left.snapshot(), right.snapshot());
    }
}
