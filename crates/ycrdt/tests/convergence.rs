use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde_json::json;
use ycrdt::{Doc, ReadTxn, SharedRef, StateVector, ID};

fn sync(a: &mut Doc, b: &mut Doc) {
    let to_b = a.encode_state_as_update_v1(&b.state_vector()).unwrap();
    let to_a = b.encode_state_as_update_v1(&a.state_vector()).unwrap();
    b.apply_update_v1(&to_b).unwrap();
    a.apply_update_v1(&to_a).unwrap();
}

fn full_update(doc: &Doc) -> Vec<u8> {
    doc.encode_state_as_update_v1(&StateVector::default()).unwrap()
}

#[test]
fn lower_client_id_goes_left_regardless_of_delivery_order() {
    for a_first in [true, false] {
        let mut a = Doc::with_client_id(1);
        let mut b = Doc::with_client_id(2);
        let arr_a = a.get_or_insert_array("list");
        let arr_b = b.get_or_insert_array("list");
        a.transact_mut(|txn| arr_a.insert(txn, 0, "x")).unwrap();
        b.transact_mut(|txn| arr_b.insert(txn, 0, "y")).unwrap();

        let ua = full_update(&a);
        let ub = full_update(&b);
        let mut c = Doc::with_client_id(3);
        if a_first {
            c.apply_update_v1(&ua).unwrap();
            c.apply_update_v1(&ub).unwrap();
        } else {
            c.apply_update_v1(&ub).unwrap();
            c.apply_update_v1(&ua).unwrap();
        }
        sync(&mut a, &mut b);

        let expected = json!(["x", "y"]);
        assert_eq!(arr_a.to_json(&a), expected);
        assert_eq!(arr_b.to_json(&b), expected);
        assert_eq!(c.get_or_insert_array("list").to_json(&c), expected);
    }
}

#[test]
fn insert_after_delete_uses_visible_indexes() {
    let mut doc = Doc::with_client_id(1);
    let arr = doc.get_or_insert_array("list");
    doc.transact_mut(|txn| arr.insert_range(txn, 0, ["a", "b", "c"])).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    doc.transact_mut(|txn| arr.insert(txn, 1, "z")).unwrap();
    assert_eq!(arr.to_json(&doc), json!(["a", "z", "c"]));
}

#[test]
fn concurrent_map_writes_pick_higher_client() {
    let mut a = Doc::with_client_id(1);
    let mut b = Doc::with_client_id(2);
    let map_a = a.get_or_insert_map("m");
    let map_b = b.get_or_insert_map("m");
    a.transact_mut(|txn| map_a.insert(txn, "k", "from a")).unwrap();
    b.transact_mut(|txn| map_b.insert(txn, "k", "from b")).unwrap();
    sync(&mut a, &mut b);
    assert_eq!(map_a.to_json(&a), json!({"k": "from b"}));
    assert_eq!(map_b.to_json(&b), json!({"k": "from b"}));
}

#[test]
fn concurrent_text_edits_interleave_deterministically() {
    let mut a = Doc::with_client_id(1);
    let mut b = Doc::with_client_id(2);
    let ta = a.get_or_insert_text("t");
    let tb = b.get_or_insert_text("t");
    a.transact_mut(|txn| ta.insert(txn, 0, "hello world")).unwrap();
    sync(&mut a, &mut b);

    a.transact_mut(|txn| ta.insert(txn, 5, ",")).unwrap();
    b.transact_mut(|txn| {
        tb.remove_range(txn, 6, 5)?;
        tb.insert(txn, 6, "there")
    })
    .unwrap();
    sync(&mut a, &mut b);

    assert_eq!(ta.get_string(&a), "hello, there");
    assert_eq!(ta.get_string(&a), tb.get_string(&b));
}

#[test]
fn remote_roots_are_claimed_by_type() {
    let mut a = Doc::with_client_id(1);
    let arr = a.get_or_insert_array("list");
    let map = a.get_or_insert_map("map");
    a.transact_mut(|txn| {
        arr.push_back(txn, 1.0)?;
        map.insert(txn, "k", true)
    })
    .unwrap();

    let mut b = Doc::with_client_id(2);
    b.apply_update_v1(&full_update(&a)).unwrap();
    // unclaimed roots render from their content
    assert_eq!(b.to_json(), json!({"list": [1], "map": {"k": true}}));
    let claimed = b.get_or_insert_map("map");
    assert_eq!(claimed.to_json(&b), json!({"k": true}));
}

#[test]
fn nested_containers_converge() {
    let mut a = Doc::with_client_id(1);
    let mut b = Doc::with_client_id(2);
    let root_a = a.get_or_insert_map("root");
    a.transact_mut(|txn| {
        let list = root_a.insert_array(txn, "items")?;
        list.insert_range(txn, 0, [1.0, 2.0])?;
        let text = list.insert_text(txn, 2)?;
        text.push(txn, "note")
    })
    .unwrap();
    sync(&mut a, &mut b);

    let root_b = b.get_or_insert_map("root");
    let list_b = root_b.get(&b, "items").and_then(|v| v.to_array()).unwrap();
    b.transact_mut(|txn| list_b.remove(txn, 0)).unwrap();
    sync(&mut a, &mut b);

    let expected = json!({"items": [2, "note"]});
    assert_eq!(root_a.to_json(&a), expected);
    assert_eq!(root_b.to_json(&b), expected);
}

#[test]
fn randomized_replicas_converge() {
    let mut rng = Xoshiro256StarStar::seed_from_u64(7);
    let mut docs: Vec<Doc> = (1..=3).map(Doc::with_client_id).collect();

    for _ in 0..300 {
        let i = rng.gen_range(0..docs.len());
        let doc = &mut docs[i];
        let arr = doc.get_or_insert_array("list");
        let text = doc.get_or_insert_text("text");
        let map = doc.get_or_insert_map("map");
        let op = rng.gen_range(0..6);
        let len = arr.len(&*doc);
        let text_len = text.len(&*doc);
        let pos = rng.gen_range(0..=len);
        let text_pos = rng.gen_range(0..=text_len);
        let value = rng.gen_range(0..100) as f64;
        doc.transact_mut(|txn| match op {
            0 | 1 => arr.insert_range(txn, pos, [value, value + 1.0]),
            2 if len > 0 => {
                let at = pos.min(len - 1);
                let n = (len - at).min(2);
                arr.remove_range(txn, at, n)
            }
            3 => text.insert(txn, text_pos, "ab"),
            4 if text_len > 0 => text.remove_range(txn, text_pos.min(text_len - 1), 1),
            _ => map.insert(txn, &format!("k{}", value as u32 % 5), value),
        })
        .unwrap();

        if rng.gen_bool(0.3) {
            let j = rng.gen_range(0..docs.len());
            if i != j {
                let (x, y) = if i < j { (i, j) } else { (j, i) };
                let (left, right) = docs.split_at_mut(y);
                sync(&mut left[x], &mut right[0]);
            }
        }
    }

    for _ in 0..2 {
        for x in 0..docs.len() {
            for y in x + 1..docs.len() {
                let (left, right) = docs.split_at_mut(y);
                sync(&mut left[x], &mut right[0]);
            }
        }
    }

    let expected = docs[0].to_json();
    for doc in &docs {
        assert_eq!(doc.to_json(), expected);
        doc.store().integrity_check().unwrap();
    }
}

#[test]
fn colliding_client_id_is_regenerated_after_remote_update() {
    let mut a = Doc::with_client_id(7);
    let mut b = Doc::with_client_id(7);
    let arr_a = a.get_or_insert_array("list");
    let arr_b = b.get_or_insert_array("list");
    a.transact_mut(|txn| arr_a.push_back(txn, "x")).unwrap();
    assert_eq!(a.client_id(), 7);

    b.apply_update_v1(&full_update(&a)).unwrap();
    let regenerated = b.client_id();
    assert_ne!(regenerated, 7);

    b.transact_mut(|txn| arr_b.push_back(txn, "y")).unwrap();
    assert_eq!(b.state_vector().get(&7), 1);
    assert_eq!(b.state_vector().get(&regenerated), 1);
    assert!(b.store().get_item(&ID::new(regenerated, 0)).is_some());

    a.apply_update_v1(&full_update(&b)).unwrap();
    assert_eq!(a.client_id(), 7);
    assert_eq!(arr_a.to_json(&a), json!(["x", "y"]));
    assert_eq!(arr_b.to_json(&b), json!(["x", "y"]));
}
