//! Adaptive packed-memory-array index for 64-bit integer keys.
//!
//! A [`PmaIndex`] keeps ordered `(i64, i64)` pairs in a segmented sparse
//! array (a *packed memory array*) topped by a static separator index that
//! maps keys to segments. Point operations touch a single segment; when a
//! segment over- or underflows, a calibrator tree of nested windows with
//! height-dependent density bounds picks the smallest window to
//! redistribute, and only when the root band is violated does the whole
//! array resize.
//!
//! Rebalancing uses two strategies: an in-place two-chunk
//! compact-and-redistribute for windows below one extent, and an
//! extent-granular right-to-left redistribution backed by staging buffers
//! for larger windows. Sorted batches are bulk loaded by partitioning them
//! into per-segment runs and fusing runs up the calibrator tree.
//!
//! ## Example
//!
//! ```rust
//! use marrow_pma::PmaIndex;
//!
//! let mut index = PmaIndex::new().unwrap();
//! index.insert(10, 100);
//! index.insert(20, 200);
//!
//! assert_eq!(index.get(10), Some(100));
//! assert_eq!(index.remove(20), Some(200));
//! assert_eq!(index.get(20), None);
//! ```
//!
//! Keys are assumed unique: inserting a key twice is accepted, but `get`
//! then returns one of the stored values, unspecified which.

mod bulk;
mod density;
mod rebalance;
mod rewired;
mod scan;
mod spread;
mod stats;
mod storage;

#[cfg(test)]
mod proptests;

use density::DensityBounds;
use marrow_index::StaticIndex;
use storage::Storage;

pub use marrow_common::{IndexConfig, MarrowError, Result};
pub use scan::{Range, SumResult};
pub use stats::SegmentStatistics;

/// An ordered map from `i64` keys to `i64` values backed by a packed
/// memory array.
pub struct PmaIndex {
    pub(crate) index: StaticIndex,
    pub(crate) storage: Storage,
    pub(crate) density: DensityBounds,
}

impl PmaIndex {
    /// Creates an index with the default configuration (64-slot segments,
    /// one page per extent).
    pub fn new() -> Result<Self> {
        Self::with_config(IndexConfig::default())
    }

    /// Creates an index with the given configuration.
    pub fn with_config(config: IndexConfig) -> Result<Self> {
        let storage = Storage::new(&config)?;
        Ok(Self {
            index: StaticIndex::new(1),
            storage,
            density: DensityBounds::new(),
        })
    }

    /// Number of elements stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.cardinality
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.cardinality == 0
    }

    /// Slots per segment, after rounding.
    #[inline]
    pub fn segment_capacity(&self) -> usize {
        self.storage.segment_capacity
    }

    /// Inserts a key-value pair.
    ///
    /// Keys are assumed unique; inserting a key that is already present
    /// stores a second pair and leaves which one lookups return
    /// unspecified.
    pub fn insert(&mut self, key: i64, value: i64) {
        if self.is_empty() {
            self.insert_empty(key, value);
        } else {
            let segment_id = self.index.find(key);
            self.insert_common(segment_id, key, value);
        }
    }

    fn insert_empty(&mut self, key: i64, value: i64) {
        debug_assert!(self.is_empty());
        let b = self.storage.segment_capacity;
        self.index.set_separator_key(0, key);
        let (keys, values, sizes) = self.storage.parts_mut();
        sizes[0] = 1;
        keys[b - 1] = key;
        values[b - 1] = value;
        self.storage.cardinality = 1;
    }

    pub(crate) fn insert_common(&mut self, segment_id: usize, key: i64, value: i64) {
        debug_assert!(!self.is_empty());
        debug_assert!(segment_id < self.storage.number_segments);

        if self.storage.sizes()[segment_id] as usize == self.storage.segment_capacity {
            self.rebalance(segment_id, Some((key, value)));
        } else {
            let minimum_updated = self.storage.insert_into_segment(segment_id, key, value);
            if minimum_updated {
                self.index.set_separator_key(segment_id, key);
            }
        }
    }

    /// Removes `key` and returns its value, or `None` when absent.
    pub fn remove(&mut self, key: i64) -> Option<i64> {
        if self.is_empty() {
            return None;
        }

        let segment_id = self.index.find(key);
        let b = self.storage.segment_capacity;
        let base = segment_id * b;
        let mut removed = None;
        let mut minimum_removed = false;

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            let sz = sizes[segment_id] as usize;
            debug_assert!(sz > 0, "lookup hit an empty segment");

            if segment_id % 2 == 0 {
                let imin = b - sz;
                if let Some(i) = (imin..b).find(|&i| keys[base + i] == key) {
                    removed = Some(values[base + i]);
                    // Close the gap by sliding the left part of the run right.
                    for j in (imin + 1..=i).rev() {
                        keys[base + j] = keys[base + j - 1];
                        values[base + j] = values[base + j - 1];
                    }
                    sizes[segment_id] = (sz - 1) as u16;
                    minimum_removed = i == imin;
                }
            } else if let Some(i) = (0..sz).find(|&i| keys[base + i] == key) {
                removed = Some(values[base + i]);
                for j in i..sz - 1 {
                    keys[base + j] = keys[base + j + 1];
                    values[base + j] = values[base + j + 1];
                }
                sizes[segment_id] = (sz - 1) as u16;
                minimum_removed = i == 0;
            }
        }

        if removed.is_none() {
            return None;
        }
        self.storage.cardinality -= 1;

        if minimum_removed {
            if segment_id % 2 == 0 {
                if self.storage.cardinality == 0 {
                    self.index.set_separator_key(0, i64::MIN);
                } else {
                    let imin = b - self.storage.sizes()[segment_id] as usize - 1;
                    let minimum = self.storage.keys()[base + imin + 1];
                    self.index.set_separator_key(segment_id, minimum);
                }
            } else if self.storage.sizes()[segment_id] > 0 {
                let minimum = self.storage.keys()[base];
                self.index.set_separator_key(segment_id, minimum);
            }
        }

        if self.storage.number_segments > 1 {
            let rho = self.density.thresholds(1, self.storage.height).0;
            let minimum_size = ((rho * b as f64) as usize).max(1);
            if (self.storage.sizes()[segment_id] as usize) < minimum_size {
                self.rebalance(segment_id, None);
            }
        }

        removed
    }

    /// Returns the value stored under `key`, or `None` when absent.
    pub fn get(&self, key: i64) -> Option<i64> {
        if self.is_empty() {
            return None;
        }

        let segment_id = self.index.find(key);
        let b = self.storage.segment_capacity;
        let base = segment_id * b;
        let keys = self.storage.keys();
        let sz = self.storage.sizes()[segment_id] as usize;

        let (start, stop) = if segment_id % 2 == 0 {
            (b - sz, b)
        } else {
            (0, sz)
        };

        (start..stop)
            .find(|&i| keys[base + i] == key)
            .map(|i| self.storage.values()[base + i])
    }

    /// Total bytes held by the index, including the separator index and
    /// the backing arrays.
    pub fn memory_footprint(&self) -> usize {
        let elts = 2 * self.storage.number_segments * self.storage.segment_capacity
            * std::mem::size_of::<i64>();
        let sizes = self.storage.number_segments.max(2) * std::mem::size_of::<u16>();
        std::mem::size_of::<Self>() + self.index.memory_footprint() + elts + sizes
    }

    /// Checks the structural invariants: global key order, separator keys
    /// matching segment minima, and the registered cardinality.
    pub fn validate(&self) -> Result<()> {
        let b = self.storage.segment_capacity;
        let keys = self.storage.keys();
        let sizes = self.storage.sizes();
        let mut previous = i64::MIN;
        let mut counted = 0usize;

        for segment_id in 0..self.storage.number_segments {
            let sz = sizes[segment_id] as usize;
            counted += sz;
            if sz == 0 {
                continue;
            }
            let base = segment_id * b;
            let (start, stop) = if segment_id % 2 == 0 {
                (b - sz, b)
            } else {
                (0, sz)
            };
            for i in start..stop {
                let current = keys[base + i];
                if current < previous {
                    return Err(MarrowError::OrderViolation {
                        segment_id,
                        previous,
                        current,
                    });
                }
                previous = current;
            }
            let minimum = keys[base + start];
            let separator = self.index.separator_key(segment_id);
            if minimum != separator {
                return Err(MarrowError::SeparatorMismatch {
                    segment_id,
                    minimum,
                    separator,
                });
            }
        }

        if counted != self.storage.cardinality {
            return Err(MarrowError::CardinalityMismatch {
                registered: self.storage.cardinality,
                counted,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index() -> PmaIndex {
        PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_empty_index() {
        let index = PmaIndex::new().unwrap();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.get(42), None);
    }

    #[test]
    fn test_insert_then_get() {
        let mut index = small_index();
        index.insert(5, 50);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(5), Some(50));
        assert_eq!(index.get(6), None);
        index.validate().unwrap();
    }

    #[test]
    fn test_insert_descending_within_one_segment() {
        let mut index = small_index();
        for key in (1..=20).rev() {
            index.insert(key, key * 10);
        }
        index.validate().unwrap();
        for key in 1..=20 {
            assert_eq!(index.get(key), Some(key * 10));
        }
        // Everything fits in the first segment: no growth yet.
        assert_eq!(index.segment_capacity(), 32);
        assert_eq!(index.len(), 20);
    }

    #[test]
    fn test_single_segment_fills_before_growing() {
        let mut index = small_index();
        for key in 1..=32 {
            index.insert(key, key);
        }
        assert_eq!(index.len(), 32);
        index.validate().unwrap();
        for key in 1..=32 {
            assert_eq!(index.get(key), Some(key));
        }
    }

    #[test]
    fn test_growth_past_first_segment() {
        let mut index = small_index();
        for key in 1..=33 {
            index.insert(key, -key);
        }
        index.validate().unwrap();
        for key in 1..=33 {
            assert_eq!(index.get(key), Some(-key));
        }
    }

    #[test]
    fn test_insert_remove_roundtrip() {
        let mut index = small_index();
        for key in 1..=100 {
            index.insert(key, key * 2);
        }
        assert_eq!(index.remove(40), Some(80));
        assert_eq!(index.get(40), None);
        assert_eq!(index.remove(40), None);
        assert_eq!(index.len(), 99);
        index.validate().unwrap();
    }

    #[test]
    fn test_remove_until_empty() {
        let mut index = small_index();
        for key in 1..=50 {
            index.insert(key, key);
        }
        for key in 1..=50 {
            assert_eq!(index.remove(key), Some(key));
        }
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        index.validate().unwrap();
        // The emptied structure accepts new inserts.
        index.insert(7, 70);
        assert_eq!(index.get(7), Some(70));
    }

    #[test]
    fn test_random_order_inserts() {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut keys: Vec<i64> = (1..=5000).collect();
        keys.shuffle(&mut rng);

        let mut index = small_index();
        for &key in &keys {
            index.insert(key, key * 3);
        }
        index.validate().unwrap();
        assert_eq!(index.len(), 5000);
        for key in 1..=5000 {
            assert_eq!(index.get(key), Some(key * 3));
        }
    }

    #[test]
    fn test_memory_footprint_grows() {
        let mut index = small_index();
        let before = index.memory_footprint();
        for key in 1..=1000 {
            index.insert(key, key);
        }
        assert!(index.memory_footprint() > before);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PmaIndex::with_config(IndexConfig {
            segment_capacity: 8,
            pages_per_extent: 1,
        });
        assert!(result.is_err());
    }
}
