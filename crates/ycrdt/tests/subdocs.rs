use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ycrdt::{Any, Doc, Options, ReadTxn, StateVector, SubDoc, SubdocsEvent};

fn guids(list: &[SubDoc]) -> Vec<Arc<str>> {
    list.iter().map(|s| s.guid.clone()).collect()
}

fn record(doc: &mut Doc) -> Rc<RefCell<Vec<SubdocsEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    doc.observe_subdocs(move |_, e| sink.borrow_mut().push(e.clone()));
    events
}

#[test]
fn attaching_and_removing_subdocuments() {
    let mut doc = Doc::with_client_id(1);
    let events = record(&mut doc);
    let map = doc.get_or_insert_map("docs");
    let child = Doc::with_options(Options {
        guid: Some("child".into()),
        ..Options::default()
    });
    let descriptor = child.as_subdoc();
    assert_eq!(&*descriptor.guid, "child");

    doc.transact_mut(|txn| map.insert(txn, "a", descriptor.clone())).unwrap();
    assert_eq!(doc.subdocs().count(), 1);

    doc.transact_mut(|txn| Ok(map.remove(txn, "a"))).unwrap();
    assert_eq!(doc.subdocs().count(), 0);

    let events = events.borrow();
    assert_eq!(events.len(), 2);
    assert_eq!(guids(&events[0].added), vec![Arc::<str>::from("child")]);
    assert!(events[0].removed.is_empty());
    assert_eq!(guids(&events[1].removed), vec![Arc::<str>::from("child")]);
}

#[test]
fn add_and_remove_in_one_transaction_cancel_out() {
    let mut doc = Doc::with_client_id(1);
    let events = record(&mut doc);
    let map = doc.get_or_insert_map("docs");
    doc.transact_mut(|txn| {
        map.insert(txn, "a", SubDoc::new("tmp", &Options::default()))?;
        map.remove(txn, "a");
        Ok(())
    })
    .unwrap();
    assert!(events.borrow().iter().all(|e| e.added.is_empty() && e.removed.is_empty()));
    assert_eq!(doc.subdocs().count(), 0);
}

#[test]
fn remote_auto_load_subdocuments_are_loaded() {
    let mut a = Doc::with_client_id(1);
    let map = a.get_or_insert_map("docs");
    let eager = SubDoc::new(
        "eager",
        &Options {
            auto_load: true,
            meta: Some(Any::from("info")),
            ..Options::default()
        },
    );
    let lazy = SubDoc::new("lazy", &Options::default());
    a.transact_mut(|txn| {
        map.insert(txn, "eager", eager)?;
        map.insert(txn, "lazy", lazy)
    })
    .unwrap();

    let mut b = Doc::with_client_id(2);
    let events = record(&mut b);
    b.apply_update_v1(&a.encode_state_as_update_v1(&StateVector::default()).unwrap())
        .unwrap();
    {
        let events = events.borrow();
        let mut added = guids(&events[0].added);
        added.sort();
        assert_eq!(added, vec![Arc::<str>::from("eager"), Arc::<str>::from("lazy")]);
        assert_eq!(guids(&events[0].loaded), vec![Arc::<str>::from("eager")]);
    }
    let eager = b.subdocs().find(|s| &*s.guid == "eager").unwrap();
    assert!(eager.auto_load());
    assert!(eager.should_load);

    b.transact_mut(|txn| {
        assert!(txn.load_subdoc("lazy"));
        assert!(!txn.load_subdoc("missing"));
        Ok(())
    })
    .unwrap();
    assert_eq!(guids(&events.borrow()[1].loaded), vec![Arc::<str>::from("lazy")]);
    assert!(b.subdocs().all(|s| s.should_load));
}
