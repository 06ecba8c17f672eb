//! End-to-end behavior of the dict: cooperative rehashing, the three
//! iteration flavors, the cursor scan, and random sampling.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use dict::{
    BytesPolicy, Dict, DictContext, HashSeed, InsertError, NoCasePolicy, Scalar, StdPolicy,
};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

type BytesDict<V> = Dict<BytesPolicy, V>;

fn ctx() -> Arc<DictContext> {
    Arc::new(DictContext::new(HashSeed::from_bytes(*b"fixed seed 16byt")))
}

fn new_dict<V>() -> BytesDict<V> {
    Dict::new(BytesPolicy::default(), ctx())
}

fn key(i: usize) -> Vec<u8> {
    format!("k{i}").into_bytes()
}

#[test]
fn add_get_replace_delete() {
    let mut d = new_dict();
    d.add(b"alpha".to_vec(), 1u64).unwrap();
    d.add(b"beta".to_vec(), 2).unwrap();

    assert_eq!(d.get(&b"alpha".to_vec()), Some(&1));
    assert_eq!(d.get(&b"gamma".to_vec()), None);
    assert_eq!(d.peek(&b"beta".to_vec()), Some(&2));
    assert_eq!(d.len(), 2);

    match d.add(b"alpha".to_vec(), 9) {
        Err(InsertError::Occupied(k, v)) => {
            assert_eq!(k, b"alpha".to_vec());
            assert_eq!(v, 9);
        }
        other => panic!("expected occupied, got {other:?}"),
    }
    assert_eq!(d.get(&b"alpha".to_vec()), Some(&1));

    assert!(!d.replace(b"alpha".to_vec(), 10).unwrap());
    assert_eq!(d.get(&b"alpha".to_vec()), Some(&10));
    assert!(d.replace(b"gamma".to_vec(), 3).unwrap());
    assert_eq!(d.len(), 3);

    assert!(d.delete(&b"beta".to_vec()));
    assert!(!d.delete(&b"beta".to_vec()));
    assert_eq!(d.get(&b"beta".to_vec()), None);
    assert_eq!(d.len(), 2);

    *d.get_mut(&b"gamma".to_vec()).unwrap() += 100;
    assert_eq!(d.get(&b"gamma".to_vec()), Some(&103));
}

#[test]
fn take_returns_ownership() {
    let mut d = new_dict();
    d.add(b"k".to_vec(), String::from("value")).unwrap();
    let (k, v) = d.take(&b"k".to_vec()).unwrap();
    assert_eq!(k, b"k".to_vec());
    assert_eq!(v, "value");
    assert!(d.is_empty());
    assert!(d.take(&b"k".to_vec()).is_none());
}

#[test]
fn add_or_get_inserts_once() {
    let mut d = new_dict();
    *d.add_or_get(b"hits".to_vec(), 0u64).unwrap() += 1;
    *d.add_or_get(b"hits".to_vec(), 0).unwrap() += 1;
    assert_eq!(d.get(&b"hits".to_vec()), Some(&2));
    assert_eq!(d.len(), 1);
}

/// Insert a thousand keys; after every insert all previously inserted
/// keys are still reachable, and the table ends fully migrated.
#[test]
fn incremental_rehash_never_loses_keys() {
    let mut d = new_dict();
    for i in 0..1000usize {
        d.add(key(i), i as u64).unwrap();
        for j in (0..=i).step_by(97) {
            assert_eq!(d.get(&key(j)), Some(&(j as u64)), "key {j} after {i}");
        }
    }
    // Plenty of operations have run; drain whatever migration remains.
    while d.rehash(100) {}

    assert_eq!(d.len(), 1000);
    assert!(!d.is_rehashing());
    assert_eq!(d.rehash_index(), -1);
    let stats = d.stats();
    assert!(stats.rehashing.is_none());
    assert_eq!(stats.main.used, 1000);
    for i in 0..1000 {
        assert_eq!(d.get(&key(i)), Some(&(i as u64)));
    }
}

#[test]
fn rehash_for_ms_makes_progress() {
    let mut d = new_dict();
    for i in 0..512 {
        d.add(key(i), 0u64).unwrap();
    }
    assert!(d.is_rehashing());
    // A generous budget finishes any 512-key migration.
    d.rehash_for_ms(1000);
    assert!(!d.is_rehashing());
}

/// A safe iterator tolerates inserts made while it is out: the walk still
/// covers every key exactly once.
#[test]
fn safe_iterator_sees_every_key_once() {
    let mut d = new_dict();
    for k in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        d.add(k, 0u64).unwrap();
    }

    let mut it = d.safe_iter();
    d.add(b"d".to_vec(), 0).unwrap();

    let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();
    while let Some((k, _)) = d.iter_next(&mut it) {
        *seen.entry(k.clone()).or_default() += 1;
    }
    d.release_iter(it);

    let expected: HashSet<Vec<u8>> =
        [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()].into();
    assert_eq!(seen.keys().cloned().collect::<HashSet<_>>(), expected);
    assert!(seen.values().all(|&n| n == 1), "duplicates: {seen:?}");
}

/// While any safe iterator is out, mutating operations stop advancing
/// the migration.
#[test]
fn safe_iterator_pauses_rehash() {
    let mut d = new_dict();
    for i in 0..64 {
        d.add(key(i), 0u64).unwrap();
    }
    assert!(d.is_rehashing());

    let mut it = d.safe_iter();
    assert!(d.iter_next(&mut it).is_some());
    let parked = d.rehash_index();
    for i in 0..64 {
        assert!(d.get(&key(i)).is_some());
    }
    assert_eq!(d.rehash_index(), parked);
    d.release_iter(it);

    // Released: lookups migrate again.
    for i in 0..64 {
        let _ = d.get(&key(i));
    }
    assert!(d.rehash_index() > parked || !d.is_rehashing());
}

#[test]
fn safe_iterator_walks_both_tables_mid_rehash() {
    let mut d = new_dict();
    for i in 0..64 {
        d.add(key(i), i as u64).unwrap();
    }
    assert!(d.is_rehashing());

    let mut it = d.safe_iter();
    let mut seen = HashSet::new();
    while let Some((k, _)) = d.iter_next(&mut it) {
        assert!(seen.insert(k.clone()), "duplicate {k:?}");
    }
    d.release_iter(it);
    assert_eq!(seen.len(), 64);
}

#[test]
fn raw_iterator_without_mutation_is_fine() {
    let mut d = new_dict();
    for i in 0..32 {
        d.add(key(i), i as u64).unwrap();
    }
    let mut it = d.raw_iter();
    let mut count = 0;
    while d.iter_next(&mut it).is_some() {
        count += 1;
    }
    d.release_iter(it);
    assert_eq!(count, 32);
}

#[test]
#[should_panic(expected = "structurally modified during raw iteration")]
fn raw_iterator_detects_mutation() {
    let mut d = new_dict();
    for i in 0..32 {
        d.add(key(i), i as u64).unwrap();
    }
    let mut it = d.raw_iter();
    let _ = d.iter_next(&mut it);
    d.add(key(33), 33).unwrap();
    d.release_iter(it);
}

#[test]
fn borrowing_iterator_covers_both_tables() {
    let mut d = new_dict();
    for i in 0..64 {
        d.add(key(i), i as u64).unwrap();
    }
    assert!(d.is_rehashing());
    let seen: HashSet<Vec<u8>> = d.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(seen.len(), 64);
}

/// Repeated scans from cursor 0 visit every key that stays present for
/// the whole sweep, even though the table grows mid-sweep.
#[test]
fn scan_covers_keys_across_growth() {
    let mut d = new_dict();
    for i in 0..100 {
        d.add(key(i), i as u64).unwrap();
    }

    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut cursor = 0;
    let mut rounds = 0;
    loop {
        cursor = d.scan(cursor, |k, _| {
            seen.insert(k.clone());
        });
        rounds += 1;
        if rounds == 3 {
            // Mid-sweep churn: another batch, plus lookups that advance
            // the resulting migration.
            for i in 100..400 {
                d.add(key(i), i as u64).unwrap();
            }
            for i in 0..100 {
                assert!(d.get(&key(i)).is_some());
            }
        }
        if cursor == 0 {
            break;
        }
    }
    for i in 0..100 {
        assert!(seen.contains(&key(i)), "scan missed key {i}");
    }
}

#[test]
fn scan_of_empty_dict_terminates() {
    let d: BytesDict<u64> = new_dict();
    let mut visited = 0;
    assert_eq!(
        d.scan(0, |_, _| {
            visited += 1;
        }),
        0
    );
    assert_eq!(visited, 0);
}

#[test]
fn random_entry_and_sample_stay_in_bounds() {
    let mut d = new_dict();
    let mut rng = SmallRng::seed_from_u64(42);
    assert!(d.random_entry(&mut rng).is_none());

    for i in 0..100 {
        d.add(key(i), i as u64).unwrap();
    }

    for _ in 0..200 {
        let (k, v) = d.random_entry(&mut rng).unwrap();
        assert_eq!(k, &key(*v as usize));
    }

    let sampled = d.sample(&mut rng, 10);
    assert!(sampled.len() <= 10);
    assert!(!sampled.is_empty());
    for (k, v) in &sampled {
        assert_eq!(*k, &key(**v as usize));
    }

    // Asking for more than exists caps at the population.
    let mut small = new_dict();
    small.add(b"only".to_vec(), 0u64).unwrap();
    let all = small.sample(&mut rng, 64);
    assert_eq!(all.len(), 1);
}

#[test]
fn values_drop_exactly_once() {
    let marker = Rc::new(());
    let mut d = new_dict();
    for i in 0..10 {
        d.add(key(i), Rc::clone(&marker)).unwrap();
    }
    assert_eq!(Rc::strong_count(&marker), 11);

    assert!(d.delete(&key(0)));
    assert_eq!(Rc::strong_count(&marker), 10);

    // Replace drops the displaced value, once.
    d.replace(key(1), Rc::clone(&marker)).unwrap();
    assert_eq!(Rc::strong_count(&marker), 10);

    let taken = d.take(&key(2)).unwrap();
    assert_eq!(Rc::strong_count(&marker), 10);
    drop(taken);
    assert_eq!(Rc::strong_count(&marker), 9);

    d.clear();
    assert_eq!(Rc::strong_count(&marker), 1);
    assert!(d.is_empty());

    // The cleared dict is still usable.
    d.add(b"again".to_vec(), Rc::clone(&marker)).unwrap();
    assert_eq!(d.len(), 1);
    drop(d);
    assert_eq!(Rc::strong_count(&marker), 1);
}

#[test]
fn resize_to_fit_shrinks_after_mass_delete() {
    let mut d = new_dict();
    for i in 0..1000 {
        d.add(key(i), 0u64).unwrap();
    }
    while d.rehash(100) {}
    let big = d.stats().main.size;

    for i in 0..990 {
        assert!(d.delete(&key(i)));
    }
    assert!(d.resize_to_fit().unwrap());
    while d.rehash(100) {}
    let small = d.stats().main.size;
    assert!(small < big, "{small} < {big}");
    assert_eq!(d.len(), 10);
    for i in 990..1000 {
        assert_eq!(d.get(&key(i)), Some(&0));
    }
}

#[test]
fn nocase_policy_folds_lookups() {
    let mut d: Dict<NoCasePolicy, u64> = Dict::new(NoCasePolicy::default(), ctx());
    d.add(b"Content-Length".to_vec(), 42).unwrap();
    assert_eq!(d.get(&b"content-length".to_vec()), Some(&42));
    assert_eq!(d.get(&b"CONTENT-LENGTH".to_vec()), Some(&42));
    assert!(matches!(
        d.add(b"CONTENT-length".to_vec(), 7),
        Err(InsertError::Occupied(..))
    ));
}

#[test]
fn std_policy_takes_any_hashable_key() {
    let mut d: Dict<StdPolicy<(u32, u32)>, &str> = Dict::new(StdPolicy::default(), ctx());
    d.add((1, 2), "a").unwrap();
    d.add((2, 1), "b").unwrap();
    assert_eq!(d.get(&(1, 2)), Some(&"a"));
    assert_eq!(d.get(&(2, 1)), Some(&"b"));
}

#[test]
fn scalar_cell_mixes_value_shapes() {
    let mut d: BytesDict<Scalar<String>> = new_dict();
    d.add(b"name".to_vec(), Scalar::Obj("remora".to_string()))
        .unwrap();
    d.add(b"count".to_vec(), Scalar::Int(-3)).unwrap();
    d.add(b"bytes".to_vec(), Scalar::Uint(1 << 40)).unwrap();
    d.add(b"load".to_vec(), Scalar::Float(0.75)).unwrap();

    assert_eq!(
        d.get(&b"name".to_vec()).and_then(|s| s.as_obj()),
        Some(&"remora".to_string())
    );
    assert_eq!(d.get(&b"count".to_vec()).unwrap().as_int(), Some(-3));
    assert_eq!(d.get(&b"bytes".to_vec()).unwrap().as_uint(), Some(1 << 40));
    assert_eq!(d.get(&b"load".to_vec()).unwrap().as_float(), Some(0.75));
    assert_eq!(d.get(&b"count".to_vec()).unwrap().as_float(), None);
}

#[test]
fn byte_string_keys_through_bytes_policy() {
    use bytestr::ByteStr;
    let mut d: Dict<BytesPolicy<ByteStr>, u64> = Dict::new(BytesPolicy::default(), ctx());
    for i in 0..100u64 {
        let mut k = ByteStr::from_bytes(b"field:").unwrap();
        k.append_fmt(format_args!("{i}")).unwrap();
        d.add(k, i).unwrap();
    }
    let probe = ByteStr::from_bytes(b"field:42").unwrap();
    assert_eq!(d.get(&probe), Some(&42));
    assert!(d.delete(&probe));
    assert_eq!(d.get(&probe), None);
    assert_eq!(d.len(), 99);
}

#[test]
fn shared_context_flips_resize_for_all_dicts() {
    let shared = ctx();
    let a: BytesDict<u64> = Dict::new(BytesPolicy::default(), Arc::clone(&shared));
    let b: BytesDict<u64> = Dict::new(BytesPolicy::default(), Arc::clone(&shared));
    shared.disable_resize();
    assert!(!a.context().resize_enabled());
    assert!(!b.context().resize_enabled());
    shared.enable_resize();
    assert!(a.context().resize_enabled());
}

proptest! {
    /// Any interleaving of add/replace/delete/get agrees with a HashMap
    /// model, before and after draining the migration.
    #[test]
    fn behaves_like_a_map(ops in prop::collection::vec((0u8..4, 0u8..24, any::<u32>()), 1..200)) {
        let mut d = new_dict();
        let mut model: HashMap<Vec<u8>, u32> = HashMap::new();
        for (op, key_id, value) in ops {
            let k = vec![b'p', key_id];
            match op {
                0 => {
                    let fresh = !model.contains_key(&k);
                    prop_assert_eq!(d.add(k.clone(), value).is_ok(), fresh);
                    model.entry(k).or_insert(value);
                }
                1 => {
                    let fresh = d.replace(k.clone(), value).unwrap();
                    prop_assert_eq!(fresh, model.insert(k, value).is_none());
                }
                2 => {
                    prop_assert_eq!(d.delete(&k), model.remove(&k).is_some());
                }
                _ => {
                    prop_assert_eq!(d.get(&k).copied(), model.get(&k).copied());
                }
            }
            prop_assert_eq!(d.len(), model.len());
        }

        let mid: HashMap<Vec<u8>, u32> = d.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(&mid, &model);

        while d.rehash(100) {}
        let settled: HashMap<Vec<u8>, u32> = d.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(&settled, &model);
    }
}
