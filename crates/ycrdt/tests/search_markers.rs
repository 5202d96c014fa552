use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use ycrdt::{Any, ArrayRef, Doc, Out, ReadTxn, SharedRef, TextRef};

fn number(out: Option<Out>) -> Option<f64> {
    match out {
        Some(Out::Any(Any::Number(n))) => Some(n),
        _ => None,
    }
}

/// Checks indexed reads against the model and against a plain walk of the
/// list.
fn assert_matches(doc: &Doc, arr: ArrayRef, model: &[f64], probes: &[u32]) {
    assert_eq!(arr.len(doc) as usize, model.len());
    let walked: Vec<f64> = arr.iter(doc).filter_map(|v| number(Some(v))).collect();
    assert_eq!(walked, model);
    for &probe in probes {
        if model.is_empty() {
            break;
        }
        let i = probe as usize % model.len();
        assert_eq!(number(arr.get(doc, i as u32)), Some(model[i]), "index {i}");
    }
}

#[test]
fn ten_thousand_elements_with_random_edits() {
    let mut rng = Xoshiro256StarStar::seed_from_u64(42);
    let mut doc = Doc::with_client_id(1);
    let arr = doc.get_or_insert_array("list");
    let mut model: Vec<f64> = Vec::new();
    let mut next = 0.0;

    while model.len() < 10_000 {
        doc.transact_mut(|txn| {
            for _ in 0..50 {
                let len = model.len() as u32;
                if len > 0 && rng.gen_bool(0.25) {
                    let at = rng.gen_range(0..len);
                    let n = rng.gen_range(1..=(len - at).min(4));
                    arr.remove_range(txn, at, n)?;
                    model.drain(at as usize..(at + n) as usize);
                } else {
                    let at = rng.gen_range(0..=len);
                    let n = rng.gen_range(1..=8);
                    let values: Vec<f64> = (0..n).map(|k| next + k as f64).collect();
                    next += n as f64;
                    arr.insert_range(txn, at, values.clone())?;
                    model.splice(at as usize..at as usize, values);
                }
                if !model.is_empty() {
                    let i = rng.gen_range(0..model.len());
                    assert_eq!(number(arr.get(&*txn, i as u32)), Some(model[i]));
                }
            }
            Ok(())
        })
        .unwrap();
    }

    let probes: Vec<u32> = (0..2_000).map(|_| rng.gen()).collect();
    assert_matches(&doc, arr, &model, &probes);
}

#[test]
fn remote_edits_keep_indexes_consistent() {
    let mut rng = Xoshiro256StarStar::seed_from_u64(3);
    let mut local = Doc::with_client_id(1);
    let mut remote = Doc::with_client_id(2);
    let arr_local = local.get_or_insert_array("list");
    let arr_remote = remote.get_or_insert_array("list");

    for round in 0..200 {
        let (doc, arr) = if round % 2 == 0 {
            (&mut local, arr_local)
        } else {
            (&mut remote, arr_remote)
        };
        let len = arr.len(&*doc);
        let at = rng.gen_range(0..=len);
        let value = round as f64;
        doc.transact_mut(|txn| {
            arr.insert(txn, at, value)?;
            if len > 4 {
                arr.remove(txn, rng.gen_range(0..len))?;
            }
            Ok(())
        })
        .unwrap();
        // reads warm up the marker cache before the remote change lands
        for i in 0..arr.len(&*doc) {
            arr.get(&*doc, i);
        }
        if round % 5 == 0 {
            let ul = local.encode_state_as_update_v1(&remote.state_vector()).unwrap();
            let ur = remote.encode_state_as_update_v1(&local.state_vector()).unwrap();
            remote.apply_update_v1(&ul).unwrap();
            local.apply_update_v1(&ur).unwrap();
            for (doc, arr) in [(&local, arr_local), (&remote, arr_remote)] {
                let walked: Vec<Out> = arr.iter(doc).collect();
                for (i, value) in walked.iter().enumerate() {
                    assert_eq!(arr.get(doc, i as u32).as_ref(), Some(value));
                }
            }
        }
    }
}

#[test]
fn text_indexes_survive_formatting() {
    let mut doc = Doc::with_client_id(1);
    let text: TextRef = doc.get_or_insert_text("t");
    let mut model = String::new();
    let mut rng = Xoshiro256StarStar::seed_from_u64(11);
    for round in 0..300 {
        let len = model.len() as u32;
        let at = rng.gen_range(0..=len);
        doc.transact_mut(|txn| {
            text.insert(txn, at, "xy")?;
            if round % 10 == 0 && len > 2 {
                text.format(txn, 0, 2, "bold", true)?;
            }
            Ok(())
        })
        .unwrap();
        model.insert_str(at as usize, "xy");
    }
    assert_eq!(text.get_string(&doc), model);
}

#[derive(Debug, Clone)]
enum Op {
    Insert { at: u32, len: u32 },
    Delete { at: u32, len: u32 },
    Get { at: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<u32>(), 1u32..6).prop_map(|(at, len)| Op::Insert { at, len }),
        1 => (any::<u32>(), 1u32..4).prop_map(|(at, len)| Op::Delete { at, len }),
        2 => any::<u32>().prop_map(|at| Op::Get { at }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn indexed_reads_follow_the_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut doc = Doc::with_client_id(1);
        let arr = doc.get_or_insert_array("list");
        let mut model: Vec<f64> = Vec::new();
        let mut next = 0.0;
        for op in ops {
            let len = model.len() as u32;
            match op {
                Op::Insert { at, len: n } => {
                    let at = at % (len + 1);
                    let values: Vec<f64> = (0..n).map(|k| next + k as f64).collect();
                    next += n as f64;
                    doc.transact_mut(|txn| arr.insert_range(txn, at, values.clone())).unwrap();
                    model.splice(at as usize..at as usize, values);
                }
                Op::Delete { at, len: n } if len > 0 => {
                    let at = at % len;
                    let n = n.min(len - at);
                    doc.transact_mut(|txn| arr.remove_range(txn, at, n)).unwrap();
                    model.drain(at as usize..(at + n) as usize);
                }
                Op::Get { at } if len > 0 => {
                    let i = at % len;
                    prop_assert_eq!(number(arr.get(&doc, i)), Some(model[i as usize]));
                }
                _ => {}
            }
        }
        let walked: Vec<f64> = arr.iter(&doc).filter_map(|v| number(Some(v))).collect();
        prop_assert_eq!(walked, model);
    }
}
