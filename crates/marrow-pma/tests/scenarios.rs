//! End-to-end workload scenarios for the packed-memory-array index.
//!
//! Each scenario drives the full stack (separator index, storage,
//! rebalancing, bulk load) through a realistic workload and checks the
//! observable results plus the structural invariants.

use marrow_pma::{IndexConfig, PmaIndex, SumResult};

fn index(segment_capacity: usize, pages_per_extent: usize) -> PmaIndex {
    PmaIndex::with_config(IndexConfig {
        segment_capacity,
        pages_per_extent,
    })
    .unwrap()
}

#[test]
fn scenario_point_ops_and_aggregates() {
    let mut pma = index(32, 1);
    for key in 1..=100 {
        pma.insert(key, key);
    }

    assert_eq!(pma.get(50), Some(50));
    assert_eq!(
        pma.sum(10, 20),
        SumResult {
            num_elements: 11,
            sum_keys: 165,
            sum_values: 165,
            first_key: 10,
            last_key: 20,
        }
    );
    pma.validate().unwrap();
}

#[test]
fn scenario_remove_then_scan() {
    let mut pma = index(32, 1);
    for key in 1..=64 {
        pma.insert(key, 10 * key);
    }

    assert_eq!(pma.remove(32), Some(320));
    assert_eq!(pma.get(32), None);
    let pairs: Vec<_> = pma.range(30, 34).collect();
    assert_eq!(pairs, vec![(30, 300), (31, 310), (33, 330), (34, 340)]);
    pma.validate().unwrap();
}

#[test]
fn scenario_bulk_load_into_empty() {
    let mut pma = index(64, 1);
    let batch: Vec<(i64, i64)> = (1..=10_000).map(|k| (k, -k)).collect();
    pma.load_sorted(&batch);

    assert_eq!(pma.len(), 10_000);
    let scanned: Vec<_> = pma.iter().collect();
    assert_eq!(scanned, batch);
    pma.validate().unwrap();
}

#[test]
fn scenario_bulk_load_into_populated() {
    let mut pma = index(64, 1);
    let first: Vec<(i64, i64)> = (1..=5000).map(|k| (2 * k, k)).collect();
    pma.load_sorted(&first);

    // Disjoint keys interleaving the first batch.
    let second: Vec<(i64, i64)> = (2500..=7500).map(|k| (2 * k + 1, -k)).collect();
    pma.load_sorted(&second);

    pma.validate().unwrap();
    assert_eq!(pma.len(), first.len() + second.len());
    for &(k, v) in first.iter().chain(second.iter()) {
        assert_eq!(pma.get(k), Some(v), "key {k}");
    }
}

#[test]
fn scenario_delete_half_of_a_large_index() {
    let mut pma = index(64, 1);
    for key in 1..=100_000 {
        pma.insert(key, key);
    }
    for key in (2..=100_000).step_by(2) {
        assert_eq!(pma.remove(key), Some(key));
    }

    assert_eq!(pma.len(), 50_000);
    assert_eq!(pma.sum(1, 100_000).num_elements, 50_000);
    for key in (1..=99_999).step_by(2) {
        assert_eq!(pma.get(key), Some(key), "key {key}");
    }
    // Deletions must keep every segment above the leaf floor.
    let stats = pma.segment_statistics();
    assert!(
        stats.cardinality_min >= ((0.08 * 64.0) as usize).max(1),
        "minimum segment cardinality {} under the leaf floor",
        stats.cardinality_min
    );
    pma.validate().unwrap();
}

#[test]
fn scenario_large_ascending_load_with_wide_extents() {
    // 2 MiB extents: the array outgrows one extent and the resize path
    // switches to the extent-granular spread.
    let mut pma = index(128, 512);
    for key in 1..=1_000_000 {
        pma.insert(key, key);
    }

    assert_eq!(pma.len(), 1_000_000);
    pma.validate().unwrap();

    let mut expected = 1i64;
    for (key, value) in pma.iter() {
        assert_eq!(key, expected);
        assert_eq!(value, expected);
        expected += 1;
    }
    assert_eq!(expected, 1_000_001);
}

#[test]
fn scenario_insert_remove_netting_to_empty() {
    let mut pma = index(32, 1);
    pma.insert(42, 420);
    assert_eq!(pma.remove(42), Some(420));
    assert_eq!(pma.get(42), None);
    assert_eq!(pma.len(), 0);

    // The emptied index accepts inserts and bulk loads again.
    let batch: Vec<(i64, i64)> = (1..=100).map(|k| (k, k)).collect();
    pma.load_sorted(&batch);
    assert_eq!(pma.len(), 100);
    pma.validate().unwrap();
}

#[test]
fn scenario_interleaved_loads_match_merged_load() {
    let a: Vec<(i64, i64)> = (0..4000).map(|k| (2 * k, k)).collect();
    let b: Vec<(i64, i64)> = (0..4000).map(|k| (2 * k + 1, -k)).collect();
    let mut merged_batch: Vec<(i64, i64)> = a.iter().chain(b.iter()).copied().collect();
    merged_batch.sort_unstable();

    let mut split = index(64, 1);
    split.load_sorted(&a);
    split.load_sorted(&b);

    let mut merged = index(64, 1);
    merged.load_sorted(&merged_batch);

    split.validate().unwrap();
    merged.validate().unwrap();
    let lhs: Vec<_> = split.iter().collect();
    let rhs: Vec<_> = merged.iter().collect();
    assert_eq!(lhs, rhs);
    assert_eq!(lhs, merged_batch);
}

#[test]
fn scenario_memory_footprint_tracks_size() {
    let mut pma = index(64, 1);
    let initial = pma.memory_footprint();
    assert!(initial > 0);

    for key in 1..=50_000 {
        pma.insert(key, key);
    }
    let grown = pma.memory_footprint();
    assert!(grown > initial);
    // Footprint accounts for at least the two element arrays.
    assert!(grown >= pma.len() * 2 * std::mem::size_of::<i64>());
}

#[test]
fn scenario_sparse_key_space() {
    let mut pma = index(32, 1);
    for i in 0..10_000i64 {
        pma.insert(i * 1_000_003, i);
    }
    pma.validate().unwrap();
    for i in (0..10_000i64).step_by(111) {
        assert_eq!(pma.get(i * 1_000_003), Some(i));
    }
    assert_eq!(pma.get(17), None);
    let sum = pma.sum(i64::MIN, i64::MAX);
    assert_eq!(sum.num_elements, 10_000);
}
