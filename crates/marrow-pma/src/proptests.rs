//! Property tests comparing the index against a reference model.

use crate::{IndexConfig, PmaIndex};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Operations exercised against both the index and the model.
#[derive(Debug, Clone)]
enum Action {
    Insert(i64, i64),
    Remove(i64),
    Get(i64),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (-500i64..500, any::<i64>()).prop_map(|(k, v)| Action::Insert(k, v)),
        2 => (-500i64..500).prop_map(Action::Remove),
        1 => (-500i64..500).prop_map(Action::Get),
    ]
}

proptest! {
    #[test]
    fn model_random_operations(actions in prop::collection::vec(action_strategy(), 1..600)) {
        let mut index = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        let mut model: BTreeMap<i64, i64> = BTreeMap::new();

        for action in actions {
            match action {
                Action::Insert(key, value) => {
                    // Keys are unique by contract; route duplicates away.
                    if !model.contains_key(&key) {
                        index.insert(key, value);
                        model.insert(key, value);
                    }
                }
                Action::Remove(key) => {
                    prop_assert_eq!(index.remove(key), model.remove(&key));
                }
                Action::Get(key) => {
                    prop_assert_eq!(index.get(key), model.get(&key).copied());
                }
            }
            prop_assert_eq!(index.len(), model.len());
        }

        index.validate().unwrap();
        let scanned: Vec<(i64, i64)> = index.iter().collect();
        let expected: Vec<(i64, i64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn model_range_queries(
        keys in prop::collection::btree_set(-2000i64..2000, 1..500),
        bounds in (-2100i64..2100, -2100i64..2100),
    ) {
        let mut index = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        let mut model = BTreeMap::new();
        for &key in &keys {
            index.insert(key, key * 3);
            model.insert(key, key * 3);
        }

        let (key_min, key_max) = bounds;
        let scanned: Vec<(i64, i64)> = index.range(key_min, key_max).collect();
        let expected: Vec<(i64, i64)> = if key_min > key_max {
            Vec::new()
        } else {
            model.range(key_min..=key_max).map(|(&k, &v)| (k, v)).collect()
        };
        prop_assert_eq!(scanned, expected);

        let sum = index.sum(key_min, key_max);
        let count = if key_min > key_max {
            0
        } else {
            model.range(key_min..=key_max).count() as u64
        };
        prop_assert_eq!(sum.num_elements, count);
    }

    #[test]
    fn model_bulk_load_matches_inserts(
        keys in prop::collection::btree_set(-5000i64..5000, 1..800),
    ) {
        let batch: Vec<(i64, i64)> = keys.iter().map(|&k| (k, -k)).collect();

        let mut loaded = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        loaded.load_sorted(&batch);

        let mut inserted = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        for &(k, v) in &batch {
            inserted.insert(k, v);
        }

        loaded.validate().unwrap();
        inserted.validate().unwrap();
        let lhs: Vec<_> = loaded.iter().collect();
        let rhs: Vec<_> = inserted.iter().collect();
        prop_assert_eq!(lhs, &batch[..]);
        prop_assert_eq!(rhs, &batch[..]);
    }
}
