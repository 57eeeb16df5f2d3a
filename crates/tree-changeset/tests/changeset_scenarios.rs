mod common;

use serde_json::json;

use common::{family, marks, rev, tagged};
use tree_changeset::delta::DeltaMark;
use tree_changeset::modular::ModularChangeset;
use tree_changeset::sequence_field::{editor, CellId, Mark};
use tree_changeset::tree::NodeContent;
use tree_changeset::{ChangeAtomId, FieldKey, FieldUpPath, ModularEditBuilder, TaggedChange, UpPath};

fn items() -> FieldUpPath {
    FieldUpPath::root("items")
}

fn build(edit: impl FnOnce(&mut ModularEditBuilder)) -> ModularChangeset {
    let mut builder = ModularEditBuilder::with_family(family());
    edit(&mut builder);
    builder.take_change().unwrap()
}

#[test]
fn inverse_of_insert_is_delete() {
    let insert = build(|b| b.sequence_insert(&items(), 0, vec![json!(1), json!(2)]).unwrap());
    let inverse = family().invert(&tagged(&insert, 1), false).unwrap();
    assert_eq!(marks(&inverse, "items"), &editor::delete(0, 2, ChangeAtomId::local(2)).unwrap());
}

#[test]
fn inverse_of_delete_revives_and_back() {
    let family = family();
    let delete = build(|b| b.sequence_delete(&items(), 0, 2).unwrap());
    let revive = family.invert(&tagged(&delete, 1), false).unwrap();
    let detached_by = ChangeAtomId::tagged(rev(1), 0);
    assert_eq!(
        marks(&revive, "items"),
        &editor::revive(0, 2, detached_by, ChangeAtomId::local(2)).unwrap()
    );

    let revive = family.change_revision(&revive, Some(rev(2)), None).unwrap();
    let again = family.invert(&tagged(&revive, 2), false).unwrap();
    assert_eq!(marks(&again, "items"), &editor::delete(0, 2, ChangeAtomId::local(3)).unwrap());
}

#[test]
fn inverse_of_move_is_return() {
    let moved = build(|b| b.sequence_move(&items(), 0, 2, 3).unwrap());
    let inverse = family().invert(&tagged(&moved, 1), false).unwrap();
    assert_eq!(
        marks(&inverse, "items"),
        &editor::return_nodes(1, 2, 0, CellId::new(ChangeAtomId::tagged(rev(1), 0)), ChangeAtomId::local(2)).unwrap()
    );
}

#[test]
fn forward_inverse_gives_each_move_its_own_id() {
    let family = family();
    let first = build(|b| b.sequence_move(&items(), 0, 1, 6).unwrap());
    let second = build(|b| b.sequence_move(&items(), 0, 1, 6).unwrap());
    let composed = family.compose(&[tagged(&first, 1), tagged(&second, 2)]).unwrap();
    let inverse = family.invert(&TaggedChange::untagged(composed), false).unwrap();
    let inverse = family.change_revision(&inverse, Some(rev(3)), None).unwrap();
    assert_eq!(inverse.cross_field_keys.iter().map(|(key, _)| key.count).sum::<u32>(), 4);

    let delta = family.into_delta(&TaggedChange::untagged(inverse)).unwrap();
    let local = &delta.fields[&FieldKey::from("items")].local;
    let ids = |pick: fn(&DeltaMark) -> Option<ChangeAtomId>| {
        let mut ids: Vec<ChangeAtomId> = local
            .iter()
            .filter_map(|mark| pick(mark).map(|id| (id, mark.count)))
            .flat_map(|(id, count)| (0..count).map(move |i| id.offset(i)))
            .collect();
        ids.sort();
        ids
    };
    let attached = ids(|mark| mark.attach);
    let detached = ids(|mark| mark.detach);
    assert_eq!(attached.len(), 2);
    assert_ne!(attached[0], attached[1]);
    assert_eq!(attached, detached);
}

#[test]
fn insert_then_modify_becomes_insert_with_changes() {
    let change = build(|b| {
        b.sequence_insert(&items(), 1, vec![json!({"name": "x"})]).unwrap();
        b.sequence_insert(&FieldUpPath::under(UpPath::root_child("items", 1), "tags"), 0, vec![json!("t")])
            .unwrap();
    });
    let items = marks(&change, "items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Mark::skip(1));
    let child = items[1].changes.expect("insert carries the nested change");
    assert_eq!(items[1], Mark::insert(1, ChangeAtomId::local(0)).with_changes(child));
    let nested = change.node_changes[&child].field_changes.as_ref().unwrap();
    assert!(nested.contains_key(&FieldKey::from("tags")));
}

#[test]
fn violated_constraint_has_empty_delta() {
    let family = family();
    let guarded = build(|b| {
        b.add_node_exists_constraint(&UpPath::root_child("items", 1)).unwrap();
        b.sequence_insert(&FieldUpPath::root("log"), 0, vec![json!("entry")]).unwrap();
    });
    let delete = build(|b| b.sequence_delete(&items(), 0, 3).unwrap());

    let rebased = family.rebase(&tagged(&guarded, 2), &tagged(&delete, 1)).unwrap();
    assert!(rebased.is_violated());
    assert!(family.into_delta(&TaggedChange::untagged(rebased.clone())).unwrap().is_empty());

    let composed = family.compose(&[TaggedChange::untagged(rebased)]).unwrap();
    assert!(family.into_delta(&TaggedChange::untagged(composed)).unwrap().is_empty());
}

#[test]
fn constraint_holds_when_node_survives() {
    let family = family();
    let guarded = build(|b| {
        b.add_node_exists_constraint(&UpPath::root_child("items", 1)).unwrap();
        b.sequence_insert(&FieldUpPath::root("log"), 0, vec![json!("entry")]).unwrap();
    });
    let insert = build(|b| b.sequence_insert(&items(), 0, vec![json!(0)]).unwrap());
    let rebased = family.rebase(&tagged(&guarded, 2), &tagged(&insert, 1)).unwrap();
    assert!(!rebased.is_violated());
    let delta = family.into_delta(&TaggedChange::untagged(rebased)).unwrap();
    assert_eq!(delta.build.len(), 1);
}

#[test]
fn rollback_of_insert_cancels_content() {
    let family = family();
    let insert = build(|b| b.sequence_insert(&items(), 1, vec![json!("a"), json!("b")]).unwrap());
    let inverse = family.invert(&tagged(&insert, 1), true).unwrap();
    let rollback = family.change_revision(&inverse, Some(rev(2)), Some(rev(1))).unwrap();
    assert_eq!(rollback.destroys.get(&ChangeAtomId::tagged(rev(1), 0)), Some(&2));

    let composed = family
        .compose(&[tagged(&insert, 1), TaggedChange::untagged(rollback)])
        .unwrap();
    assert!(composed.is_empty());
}

#[test]
fn rollback_of_delete_cancels() {
    let family = family();
    let delete = build(|b| b.sequence_delete(&items(), 1, 2).unwrap());
    let inverse = family.invert(&tagged(&delete, 1), true).unwrap();
    let rollback = family.change_revision(&inverse, Some(rev(2)), Some(rev(1))).unwrap();
    let composed = family
        .compose(&[tagged(&delete, 1), TaggedChange::untagged(rollback)])
        .unwrap();
    assert!(composed.is_empty());
}

#[test]
fn rebase_over_empty_keeps_the_change() {
    let family = family();
    let insert = build(|b| b.sequence_insert(&items(), 2, vec![json!(1)]).unwrap());
    let rebased = family
        .rebase(&tagged(&insert, 2), &TaggedChange::new(ModularChangeset::default(), rev(1)))
        .unwrap();
    assert_eq!(marks(&rebased, "items"), &vec![Mark::skip(2), Mark::insert(1, ChangeAtomId::tagged(rev(2), 0))]);
}

#[test]
fn concurrent_inserts_order_by_revision() {
    let family = family();
    let first = build(|b| b.sequence_insert(&items(), 0, vec![json!("first")]).unwrap());
    let second = build(|b| b.sequence_insert(&items(), 0, vec![json!("second")]).unwrap());
    let rebased = family.rebase(&tagged(&second, 2), &tagged(&first, 1)).unwrap();
    assert_eq!(marks(&rebased, "items"), &vec![Mark::insert(1, ChangeAtomId::tagged(rev(2), 0))]);
}

#[test]
fn cross_field_move_projects_to_delta() {
    let change = build(|b| {
        b.move_across_fields(&FieldUpPath::root("a"), 1, 2, &FieldUpPath::root("b"), 0)
            .unwrap()
    });
    let delta = family().into_delta(&tagged(&change, 1)).unwrap();
    let id = Some(ChangeAtomId::tagged(rev(1), 0));
    assert_eq!(
        delta.fields[&FieldKey::from("a")].local,
        vec![
            DeltaMark::skip(1),
            DeltaMark {
                count: 2,
                attach: None,
                detach: id,
                fields: None,
            },
        ]
    );
    assert_eq!(
        delta.fields[&FieldKey::from("b")].local,
        vec![DeltaMark {
            count: 2,
            attach: id,
            detach: None,
            fields: None,
        }]
    );
}

#[test]
fn edits_to_moved_nodes_follow_the_move_in_compose() {
    let family = family();
    let moved = build(|b| {
        b.move_across_fields(&FieldUpPath::root("a"), 0, 1, &FieldUpPath::root("b"), 0)
            .unwrap()
    });
    let edit = build(|b| {
        b.sequence_delete(&FieldUpPath::under(UpPath::root_child("b", 0), "tags"), 0, 1)
            .unwrap()
    });
    let composed = family.compose(&[tagged(&moved, 1), tagged(&edit, 2)]).unwrap();
    let source = marks(&composed, "a");
    assert!(source.iter().any(|mark| mark.changes.is_some()));
    assert!(marks(&composed, "b").iter().all(|mark| mark.changes.is_none()));
}

#[test]
fn refreshers_are_backfilled_for_revives() {
    let family = family();
    let delete = build(|b| b.sequence_delete(&items(), 0, 2).unwrap());
    let revive = family.invert(&tagged(&delete, 1), false).unwrap();
    let roots = family.relevant_removed_roots(&revive).unwrap();
    assert_eq!(roots, vec![ChangeAtomId::tagged(rev(1), 0), ChangeAtomId::tagged(rev(1), 1)]);
    let resolver = |id: ChangeAtomId| -> Option<NodeContent> { Some(json!(id.local_id.0)) };
    let refreshed = family.update_refreshers(&revive, &resolver).unwrap();
    assert_eq!(refreshed.refreshers.len(), 2);
    let delta = family.into_delta(&tagged(&refreshed, 2)).unwrap();
    assert_eq!(delta.refreshers.len(), 2);
}

#[test]
fn optional_field_set_then_clear() {
    let family = family();
    let set = build(|b| b.optional_set(&FieldUpPath::root("title"), json!("hello"), true).unwrap());
    let delta = family.into_delta(&tagged(&set, 1)).unwrap();
    assert_eq!(delta.build.len(), 1);
    assert!(delta.fields.contains_key(&FieldKey::from("title")));

    let inverse = family.invert(&tagged(&set, 1), true).unwrap();
    let rollback = family.change_revision(&inverse, Some(rev(2)), Some(rev(1))).unwrap();
    let composed = family.compose(&[tagged(&set, 1), TaggedChange::untagged(rollback)]).unwrap();
    assert!(composed.builds.is_empty());
    assert!(composed.destroys.is_empty());
}
