use std::collections::HashSet;

use serde_json::json;
use ycrdt::{DeleteSet, Doc, Options, ReadTxn, SharedRef, StateVector, ID};

fn doc_without_gc(client_id: u64) -> Doc {
    Doc::with_options(Options {
        client_id: Some(client_id),
        gc: false,
        ..Options::default()
    })
}

fn full_update(doc: &Doc) -> Vec<u8> {
    doc.encode_state_as_update_v1(&StateVector::default()).unwrap()
}

#[test]
fn deleted_list_item_returns_to_its_index() {
    let mut doc = doc_without_gc(1);
    let arr = doc.get_or_insert_array("list");
    doc.transact_mut(|txn| arr.insert_range(txn, 0, ["a", "b", "c"])).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    assert_eq!(arr.to_json(&doc), json!(["a", "c"]));

    let redone = doc
        .transact_mut(|txn| txn.redo(ID::new(1, 1), &HashSet::new(), &DeleteSet::new(), false))
        .unwrap();
    assert_eq!(redone, Some(ID::new(1, 3)));
    assert_eq!(arr.to_json(&doc), json!(["a", "b", "c"]));

    let item = doc.store().get_item(&ID::new(1, 3)).unwrap();
    assert!(item.is_keep());
    doc.store().integrity_check().unwrap();
}

#[test]
fn redoing_an_item_twice_yields_the_same_copy() {
    let mut doc = doc_without_gc(1);
    let arr = doc.get_or_insert_array("list");
    doc.transact_mut(|txn| arr.insert_range(txn, 0, ["a", "b"])).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 0)).unwrap();

    let first = doc
        .transact_mut(|txn| txn.redo(ID::new(1, 0), &HashSet::new(), &DeleteSet::new(), false))
        .unwrap();
    let second = doc
        .transact_mut(|txn| txn.redo(ID::new(1, 0), &HashSet::new(), &DeleteSet::new(), false))
        .unwrap();
    assert_eq!(first, Some(ID::new(1, 2)));
    assert_eq!(second, first);
    assert_eq!(arr.to_json(&doc), json!(["a", "b"]));
}

#[test]
fn deleted_parent_is_redone_before_its_child() {
    let mut doc = doc_without_gc(1);
    let root = doc.get_or_insert_map("m");
    doc.transact_mut(|txn| {
        let list = root.insert_array(txn, "list")?;
        list.push_back(txn, "x")
    })
    .unwrap();
    doc.transact_mut(|txn| {
        root.remove(txn, "list");
        Ok(())
    })
    .unwrap();
    assert_eq!(root.to_json(&doc), json!({}));

    // the parent is deleted and not part of the batch
    let orphan = doc
        .transact_mut(|txn| txn.redo(ID::new(1, 1), &HashSet::new(), &DeleteSet::new(), false))
        .unwrap();
    assert_eq!(orphan, None);
    assert_eq!(root.to_json(&doc), json!({}));

    let batch: HashSet<ID> = [ID::new(1, 0), ID::new(1, 1)].into_iter().collect();
    let redone = doc
        .transact_mut(|txn| txn.redo(ID::new(1, 1), &batch, &DeleteSet::new(), false))
        .unwrap();
    // the parent took the first fresh clock
    assert_eq!(redone, Some(ID::new(1, 3)));
    assert!(doc.store().get_item(&ID::new(1, 2)).is_some());
    assert_eq!(root.to_json(&doc), json!({"list": ["x"]}));
    doc.store().integrity_check().unwrap();
}

#[test]
fn remotely_overwritten_map_entry_is_redone_only_when_allowed() {
    let mut a = doc_without_gc(1);
    let mut b = doc_without_gc(2);
    let map_a = a.get_or_insert_map("m");
    let map_b = b.get_or_insert_map("m");
    a.transact_mut(|txn| map_a.insert(txn, "k", "a")).unwrap();
    b.apply_update_v1(&full_update(&a)).unwrap();
    b.transact_mut(|txn| map_b.insert(txn, "k", "b")).unwrap();
    a.apply_update_v1(&full_update(&b)).unwrap();
    assert_eq!(map_a.to_json(&a), json!({"k": "b"}));
    assert!(a.store().get_item(&ID::new(1, 0)).unwrap().is_deleted());

    let blocked = a
        .transact_mut(|txn| txn.redo(ID::new(1, 0), &HashSet::new(), &DeleteSet::new(), false))
        .unwrap();
    assert_eq!(blocked, None);
    assert_eq!(map_a.to_json(&a), json!({"k": "b"}));

    let forced = a
        .transact_mut(|txn| txn.redo(ID::new(1, 0), &HashSet::new(), &DeleteSet::new(), true))
        .unwrap();
    assert_eq!(forced, Some(ID::new(1, 1)));
    assert_eq!(map_a.to_json(&a), json!({"k": "a"}));

    b.apply_update_v1(&full_update(&a)).unwrap();
    assert_eq!(map_b.to_json(&b), json!({"k": "a"}));
}
