use serde_json::json;
use ycrdt::{Doc, ItemContent, Options, ReadTxn, SharedRef, StateVector, ID};

fn content_at(doc: &Doc, id: ID) -> Option<ItemContent> {
    doc.store().get_item(&id).map(|item| item.content().clone())
}

fn abc(doc: &mut Doc) -> ycrdt::ArrayRef {
    let arr = doc.get_or_insert_array("a");
    doc.transact_mut(|txn| arr.insert_range(txn, 0, ["a", "b", "c"])).unwrap();
    arr
}

#[test]
fn deleted_content_is_discarded() {
    let mut doc = Doc::with_client_id(1);
    let arr = abc(&mut doc);
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    assert_eq!(content_at(&doc, ID::new(1, 1)), Some(ItemContent::Deleted(1)));
    assert!(matches!(content_at(&doc, ID::new(1, 0)), Some(ItemContent::Any(_))));
    assert_eq!(arr.to_json(&doc), json!(["a", "c"]));
    doc.store().integrity_check().unwrap();
}

#[test]
fn kept_items_survive_repeated_collection() {
    let mut doc = Doc::with_client_id(1);
    let arr = abc(&mut doc);
    doc.transact_mut(|txn| {
        txn.keep(ID::new(1, 1), true);
        Ok(())
    })
    .unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 0)).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 0)).unwrap();

    let item = doc.store().get_item(&ID::new(1, 1)).unwrap();
    assert!(item.is_deleted());
    assert!(item.is_keep());
    assert!(matches!(item.content(), ItemContent::Any(_)));
    assert_eq!(arr.len(&doc), 0);
}

#[test]
fn keeping_a_nested_item_keeps_its_ancestors() {
    let mut doc = Doc::with_client_id(1);
    let map = doc.get_or_insert_map("m");
    let (inner_id, child_id) = doc
        .transact_mut(|txn| {
            let inner = map.insert_array(txn, "list")?;
            inner.insert_range(txn, 0, [1.0, 2.0])?;
            let inner_id = inner.item_id(&*txn).unwrap();
            Ok((inner_id, ID::new(1, inner_id.clock + 1)))
        })
        .unwrap();
    doc.transact_mut(|txn| {
        txn.keep(child_id, true);
        Ok(())
    })
    .unwrap();
    doc.transact_mut(|txn| Ok(map.remove(txn, "list"))).unwrap();

    let parent = doc.store().get_item(&inner_id).unwrap();
    assert!(parent.is_deleted());
    assert!(parent.is_keep());
    assert!(matches!(parent.content(), ItemContent::Type(_)));
    assert!(matches!(content_at(&doc, child_id), Some(ItemContent::Any(_))));
}

#[test]
fn children_of_collected_containers_become_gc_blocks() {
    let mut doc = Doc::with_client_id(1);
    let map = doc.get_or_insert_map("m");
    let inner_id = doc
        .transact_mut(|txn| {
            let inner = map.insert_text(txn, "t")?;
            inner.push(txn, "gone")?;
            Ok(inner.item_id(&*txn).unwrap())
        })
        .unwrap();
    doc.transact_mut(|txn| Ok(map.remove(txn, "t"))).unwrap();

    assert_eq!(content_at(&doc, inner_id), Some(ItemContent::Deleted(1)));
    assert_eq!(content_at(&doc, ID::new(1, inner_id.clock + 1)), None);
    doc.store().integrity_check().unwrap();

    // a replica catching up sees the same result
    let mut other = Doc::with_client_id(2);
    other
        .apply_update_v1(&doc.encode_state_as_update_v1(&StateVector::default()).unwrap())
        .unwrap();
    assert_eq!(other.to_json(), json!({"m": {}}));
}

#[test]
fn gc_filter_can_veto_collection() {
    let mut doc = Doc::with_options(Options {
        gc_filter: Some(Box::new(|_| false)),
        ..Options::with_client_id(1)
    });
    let arr = abc(&mut doc);
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    assert!(matches!(content_at(&doc, ID::new(1, 1)), Some(ItemContent::Any(_))));
}

#[test]
fn disabled_gc_keeps_everything() {
    let mut doc = Doc::with_options(Options {
        gc: false,
        ..Options::with_client_id(1)
    });
    let arr = abc(&mut doc);
    doc.transact_mut(|txn| arr.remove_range(txn, 0, 3)).unwrap();
    for clock in 0..3 {
        let item = doc.store().get_item(&ID::new(1, clock)).unwrap();
        assert!(item.is_deleted());
        assert!(matches!(item.content(), ItemContent::Any(_)));
    }
}

#[test]
fn deleted_neighbours_merge_after_collection() {
    let mut doc = Doc::with_client_id(1);
    let text = doc.get_or_insert_text("t");
    doc.transact_mut(|txn| text.insert(txn, 0, "abcdef")).unwrap();
    doc.transact_mut(|txn| text.remove_range(txn, 1, 2)).unwrap();
    doc.transact_mut(|txn| text.remove_range(txn, 1, 2)).unwrap();
    assert_eq!(text.get_string(&doc), "af");
    // a | deleted bcde | f
    assert_eq!(doc.store().block_count(&1), 3);
    assert_eq!(content_at(&doc, ID::new(1, 2)), Some(ItemContent::Deleted(4)));
}
