use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ycrdt::{
    Any, Change, Doc, EntryChange, Event, Out, PathSegment, ReadTxn, SharedRef, StateVector,
};

type Log<T> = Rc<RefCell<Vec<T>>>;

fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

fn num(n: f64) -> Out {
    Out::Any(Any::Number(n))
}

#[test]
fn array_events_describe_the_delta() {
    let mut doc = Doc::with_client_id(1);
    let arr = doc.get_or_insert_array("a");
    let deltas: Log<Vec<Change>> = log();
    let sink = deltas.clone();
    arr.observe(&mut doc, move |_, e: &Event| sink.borrow_mut().push(e.delta().to_vec()));

    doc.transact_mut(|txn| arr.insert_range(txn, 0, [1.0, 2.0, 3.0])).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 1)).unwrap();
    doc.transact_mut(|txn| arr.insert(txn, 2, 4.0)).unwrap();

    let deltas = deltas.borrow();
    assert_eq!(deltas.len(), 3);
    assert_eq!(deltas[0], vec![Change::Added(vec![num(1.0), num(2.0), num(3.0)])]);
    assert_eq!(deltas[1], vec![Change::Retain(1), Change::Removed(1)]);
    assert_eq!(deltas[2], vec![Change::Retain(2), Change::Added(vec![num(4.0)])]);
}

#[test]
fn map_events_describe_key_changes() {
    let mut doc = Doc::with_client_id(1);
    let map = doc.get_or_insert_map("m");
    let changes: Log<Vec<(Arc<str>, EntryChange)>> = log();
    let sink = changes.clone();
    map.observe(&mut doc, move |_, e: &Event| {
        let mut keys: Vec<_> = e.keys().iter().map(|(k, c)| (k.clone(), c.clone())).collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        sink.borrow_mut().push(keys);
    });

    doc.transact_mut(|txn| {
        map.insert(txn, "a", 1.0)?;
        map.insert(txn, "b", 2.0)
    })
    .unwrap();
    doc.transact_mut(|txn| map.insert(txn, "a", 10.0)).unwrap();
    doc.transact_mut(|txn| Ok(map.remove(txn, "b"))).unwrap();

    let changes = changes.borrow();
    assert_eq!(
        changes[0],
        vec![
            ("a".into(), EntryChange::Inserted(num(1.0))),
            ("b".into(), EntryChange::Inserted(num(2.0))),
        ]
    );
    assert_eq!(changes[1], vec![("a".into(), EntryChange::Updated(num(1.0), num(10.0)))]);
    assert_eq!(changes[2], vec![("b".into(), EntryChange::Removed(num(2.0)))]);
}

#[test]
fn text_delta_carries_string_units() {
    let mut doc = Doc::with_client_id(1);
    let text = doc.get_or_insert_text("t");
    doc.transact_mut(|txn| text.insert(txn, 0, "abc")).unwrap();
    let deltas: Log<Vec<Change>> = log();
    let sink = deltas.clone();
    text.observe(&mut doc, move |_, e: &Event| sink.borrow_mut().push(e.delta().to_vec()));
    doc.transact_mut(|txn| text.remove_range(txn, 0, 2)).unwrap();
    assert_eq!(deltas.borrow()[0], vec![Change::Removed(2)]);
}

#[test]
fn deep_observers_see_nested_paths() {
    let mut doc = Doc::with_client_id(1);
    let root = doc.get_or_insert_map("root");
    let list = doc
        .transact_mut(|txn| {
            let list = root.insert_array(txn, "list")?;
            list.insert_map(txn, 0)?;
            Ok(list)
        })
        .unwrap();
    let inner = list.get(&doc, 0).and_then(|v| v.to_map()).unwrap();

    let seen: Log<Vec<(usize, Vec<PathSegment>)>> = log();
    let sink = seen.clone();
    root.observe_deep(&mut doc, move |_, events: &[Event]| {
        let paths = events
            .iter()
            .map(|e| (e.path().len(), e.path().to_vec()))
            .collect();
        sink.borrow_mut().push(paths);
    });

    doc.transact_mut(|txn| {
        inner.insert(txn, "k", "v")?;
        list.push_back(txn, 1.0)?;
        root.insert(txn, "flag", true)
    })
    .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    let paths: Vec<Vec<PathSegment>> = seen[0].iter().map(|(_, p)| p.clone()).collect();
    assert_eq!(
        paths,
        vec![
            vec![],
            vec![PathSegment::Key("list".into())],
            vec![PathSegment::Key("list".into()), PathSegment::Index(0)],
        ]
    );
}

#[test]
fn events_carry_origin_and_locality() {
    let mut a = Doc::with_client_id(1);
    let arr = a.get_or_insert_array("a");
    let seen: Log<(Option<Vec<u8>>, bool)> = log();
    let sink = seen.clone();
    arr.observe(&mut a, move |_, e: &Event| {
        sink.borrow_mut().push((e.origin().map(|o| o.as_bytes().to_vec()), e.is_local()))
    });
    a.transact_mut_with("editor", |txn| arr.push_back(txn, 1.0)).unwrap();

    let mut b = Doc::with_client_id(2);
    let arr_b = b.get_or_insert_array("a");
    b.transact_mut(|txn| arr_b.push_back(txn, 2.0)).unwrap();
    let update = b.encode_state_as_update_v1(&a.state_vector()).unwrap();
    a.transact_mut_with("network", |txn| txn.apply_update_v1(&update)).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen[0], (Some(b"editor".to_vec()), true));
    assert_eq!(seen[1], (Some(b"network".to_vec()), false));
}

#[test]
fn update_events_replicate_the_transaction() {
    let mut a = Doc::with_client_id(1);
    let mut b = Doc::with_client_id(2);
    let updates: Log<Vec<u8>> = log();
    let sink = updates.clone();
    a.observe_update_v1(move |_, e| sink.borrow_mut().push(e.update.clone()));
    let updates_v2: Log<Vec<u8>> = log();
    let sink = updates_v2.clone();
    a.observe_update_v2(move |_, e| sink.borrow_mut().push(e.update.clone()));

    let text = a.get_or_insert_text("t");
    a.transact_mut(|txn| text.insert(txn, 0, "hello")).unwrap();
    a.transact_mut(|txn| text.remove_range(txn, 0, 1)).unwrap();
    // no change, no event
    a.transact_mut(|_| Ok(())).unwrap();

    assert_eq!(updates.borrow().len(), 2);
    assert_eq!(updates_v2.borrow().len(), 2);
    for update in updates.borrow().iter() {
        b.apply_update_v1(update).unwrap();
    }
    assert_eq!(b.get_or_insert_text("t").get_string(&b), "ello");
}

#[test]
fn after_transaction_reports_states() {
    let mut doc = Doc::with_client_id(1);
    let arr = doc.get_or_insert_array("a");
    let seen: Log<(StateVector, StateVector, bool)> = log();
    let sink = seen.clone();
    doc.observe_after_transaction(move |_, e| {
        sink.borrow_mut()
            .push((e.before_state.clone(), e.after_state.clone(), e.delete_set.is_empty()))
    });
    doc.transact_mut(|txn| arr.insert_range(txn, 0, [1.0, 2.0])).unwrap();
    doc.transact_mut(|txn| arr.remove(txn, 0)).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen[0].0.get(&1), 0);
    assert_eq!(seen[0].1.get(&1), 2);
    assert!(seen[0].2);
    assert_eq!(seen[1].0, seen[1].1);
    assert!(!seen[1].2);
}

#[test]
fn unobserve_stops_delivery() {
    let mut doc = Doc::with_client_id(1);
    let arr = doc.get_or_insert_array("a");
    let count = Rc::new(RefCell::new(0));
    let sink = count.clone();
    let id = arr.observe(&mut doc, move |_, _: &Event| *sink.borrow_mut() += 1);
    doc.transact_mut(|txn| arr.push_back(txn, 1.0)).unwrap();
    assert!(arr.unobserve(&mut doc, id));
    assert!(!arr.unobserve(&mut doc, id));
    doc.transact_mut(|txn| arr.push_back(txn, 2.0)).unwrap();
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn observers_may_write_back() {
    let mut doc = Doc::with_client_id(1);
    let map = doc.get_or_insert_map("m");
    let updates = Rc::new(RefCell::new(0));
    let sink = updates.clone();
    doc.observe_update_v1(move |_, _| *sink.borrow_mut() += 1);
    map.observe(&mut doc, move |txn, e: &Event| {
        if e.keys().contains_key("ping") {
            map.insert(txn, "pong", true).unwrap();
        }
    });

    doc.transact_mut(|txn| map.insert(txn, "ping", true)).unwrap();
    assert_eq!(map.get(&doc, "pong"), Some(Out::Any(Any::Bool(true))));
    // the observer's write is committed as its own transaction
    assert_eq!(*updates.borrow(), 2);
}

#[test]
fn each_writing_observer_gets_its_own_transaction() {
    let mut doc = Doc::with_client_id(1);
    let map = doc.get_or_insert_map("m");
    let starts = Rc::new(RefCell::new(Vec::new()));
    let sink = starts.clone();
    doc.observe_after_transaction(move |_, e| sink.borrow_mut().push(e.before_state.get(&1)));
    let updates = Rc::new(RefCell::new(0));
    let sink = updates.clone();
    doc.observe_update_v1(move |_, _| *sink.borrow_mut() += 1);
    for key in ["first", "second"] {
        map.observe(&mut doc, move |txn, e: &Event| {
            if e.keys().contains_key("ping") {
                map.insert(txn, key, true).unwrap();
            }
        });
    }
    // observes without writing
    map.observe(&mut doc, |_, _: &Event| {});

    doc.transact_mut(|txn| map.insert(txn, "ping", true)).unwrap();
    assert_eq!(map.keys(&doc).len(), 3);
    assert_eq!(*starts.borrow(), vec![0, 1, 2]);
    assert_eq!(*updates.borrow(), 3);
}

#[test]
fn events_for_deleted_containers_are_skipped() {
    let mut doc = Doc::with_client_id(1);
    let root = doc.get_or_insert_map("root");
    let inner = doc.transact_mut(|txn| root.insert_array(txn, "list")).unwrap();
    let count = Rc::new(RefCell::new(0));
    let sink = count.clone();
    inner.observe(&mut doc, move |_, _: &Event| *sink.borrow_mut() += 1);
    doc.transact_mut(|txn| {
        inner.push_back(txn, 1.0)?;
        root.remove(txn, "list");
        Ok(())
    })
    .unwrap();
    assert_eq!(*count.borrow(), 0);
}
