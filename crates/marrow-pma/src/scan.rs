//! Range scans over the segmented layout.
//!
//! Both the iterator and the aggregate walk segment pairs: an even segment
//! is read from its packed start up to the segment boundary, then its odd
//! partner continues the run, so each pair is one contiguous sweep.

use crate::PmaIndex;

/// Lazy forward scan over `[key_min, key_max]`.
///
/// State is three cursors into the flat arrays: the current offset, the
/// end of the current contiguous run, and the next segment to enter, plus
/// a global fence at the last qualifying element.
pub struct Range<'a> {
    keys: &'a [i64],
    values: &'a [i64],
    sizes: &'a [u16],
    segment_capacity: usize,
    number_segments: usize,
    next_segment: usize,
    offset: usize,
    stop: usize,
    index_max: usize,
}

impl<'a> Range<'a> {
    fn empty(index: &'a PmaIndex) -> Self {
        Self {
            keys: index.storage.keys(),
            values: index.storage.values(),
            sizes: index.storage.sizes(),
            segment_capacity: index.storage.segment_capacity,
            number_segments: index.storage.number_segments,
            next_segment: 0,
            offset: 0,
            stop: 0,
            index_max: 0,
        }
    }

    pub(crate) fn new(
        index: &'a PmaIndex,
        segment_start: usize,
        segment_end: usize,
        key_min: i64,
        key_max: i64,
    ) -> Self {
        let mut range = Self::empty(index);
        debug_assert!(segment_start <= segment_end);
        if segment_end >= range.number_segments {
            return range;
        }
        let b = range.segment_capacity;
        let keys = range.keys;
        let sizes = range.sizes;

        // Forward scan for the first element >= key_min.
        let mut notfound = true;
        let mut segment_id = segment_start;
        let mut offset = 0usize;
        let mut stop = 0usize;
        while notfound && segment_id < range.number_segments {
            let start;
            if segment_id % 2 == 0 {
                stop = (segment_id + 1) * b;
                start = stop - sizes[segment_id] as usize;
            } else {
                start = segment_id * b;
                stop = start + sizes[segment_id] as usize;
            }
            offset = start;
            while offset < stop && keys[offset] < key_min {
                offset += 1;
            }
            notfound = offset == stop;
            if notfound {
                segment_id += 1;
            }
        }

        range.offset = offset;
        range.next_segment = segment_id + 1;
        range.stop = stop;
        if segment_id % 2 == 0 && range.next_segment < range.number_segments {
            // The odd partner continues the run without a gap.
            range.stop =
                range.next_segment * b + sizes[range.next_segment] as usize;
            range.next_segment += 1;
        }

        if notfound || keys[range.offset] > key_max {
            range.index_max = 0;
            range.stop = 0;
            return range;
        }

        // Backward scan from segment_end for the last element <= key_max.
        let interval_start_segment = segment_id as i64;
        let mut upper: i64 = -1;
        let mut seg = segment_end as i64;
        let mut notfound = true;
        while notfound && seg >= interval_start_segment {
            let (lo, hi) = run_bounds(seg as usize, b, sizes);
            let mut off = hi;
            while off >= lo {
                if keys[off as usize] <= key_max {
                    upper = off;
                    notfound = false;
                    break;
                }
                off -= 1;
            }
            if notfound {
                seg -= 1;
            }
        }

        if upper < range.offset as i64 {
            range.index_max = 0;
            range.stop = 0;
        } else {
            range.index_max = (upper + 1) as usize;
            range.stop = range.stop.min(range.index_max);
        }
        range
    }

    /// Positions the cursors at the next qualifying run.
    fn next_sequence(&mut self) {
        debug_assert!(self.offset >= self.stop);
        let segment1 = self.next_segment;
        if segment1 >= self.number_segments {
            return;
        }
        let b = self.segment_capacity;

        if segment1 % 2 == 0 {
            self.offset = segment1 * b + b - self.sizes[segment1] as usize;
            let segment2 = segment1 + 1;
            let mut stop = segment2 * b;
            if segment2 < self.number_segments {
                stop = (stop + self.sizes[segment2] as usize).min(self.index_max);
            } else {
                stop = stop.min(self.index_max);
            }
            self.stop = stop;
            self.next_segment += 2;
        } else {
            self.offset = segment1 * b;
            self.stop = (self.offset + self.sizes[segment1] as usize).min(self.index_max);
            self.next_segment += 1;
        }
    }
}

/// Inclusive bounds of a segment's packed run; `hi < lo` when empty.
fn run_bounds(segment_id: usize, b: usize, sizes: &[u16]) -> (i64, i64) {
    let sz = sizes[segment_id] as i64;
    if segment_id % 2 == 0 {
        let hi = ((segment_id + 1) * b) as i64 - 1;
        (hi - sz + 1, hi)
    } else {
        let lo = (segment_id * b) as i64;
        (lo, lo + sz - 1)
    }
}

impl Iterator for Range<'_> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        if self.offset >= self.stop {
            return None;
        }
        let result = (self.keys[self.offset], self.values[self.offset]);
        self.offset += 1;
        if self.offset >= self.stop {
            self.next_sequence();
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for Range<'_> {}

/// Aggregates of a key range, computed without materializing pairs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SumResult {
    /// Number of qualifying elements.
    pub num_elements: u64,
    pub sum_keys: i64,
    pub sum_values: i64,
    /// Smallest qualifying key; 0 when the range is empty.
    pub first_key: i64,
    /// Largest qualifying key; 0 when the range is empty.
    pub last_key: i64,
}

impl PmaIndex {
    /// Returns a lazy iterator over the pairs with keys in
    /// `[key_min, key_max]`.
    pub fn range(&self, key_min: i64, key_max: i64) -> Range<'_> {
        if self.is_empty() || key_min > key_max {
            return Range::empty(self);
        }
        Range::new(
            self,
            self.index.find_first(key_min),
            self.index.find_last(key_max),
            key_min,
            key_max,
        )
    }

    /// Returns a lazy iterator over all pairs in key order.
    pub fn iter(&self) -> Range<'_> {
        if self.is_empty() {
            return Range::empty(self);
        }
        Range::new(
            self,
            0,
            self.storage.number_segments - 1,
            i64::MIN,
            i64::MAX,
        )
    }

    /// Aggregates count, key sum, value sum and the boundary keys over
    /// `[key_min, key_max]`.
    pub fn sum(&self, key_min: i64, key_max: i64) -> SumResult {
        if key_min > key_max || self.is_empty() {
            return SumResult::default();
        }
        let segment_start = self.index.find_first(key_min);
        let segment_end = self.index.find_last(key_max);
        if segment_end < segment_start {
            return SumResult::default();
        }

        let b = self.storage.segment_capacity;
        let number_segments = self.storage.number_segments;
        let keys = self.storage.keys();
        let sizes = self.storage.sizes();

        // Forward scan for the first element >= key_min.
        let mut notfound = true;
        let mut segment_id = segment_start;
        let mut offset = 0usize;
        let mut stop = 0usize;
        while notfound && segment_id < number_segments {
            let start;
            if segment_id % 2 == 0 {
                stop = (segment_id + 1) * b;
                start = stop - sizes[segment_id] as usize;
            } else {
                start = segment_id * b;
                stop = start + sizes[segment_id] as usize;
            }
            offset = start;
            while offset < stop && keys[offset] < key_min {
                offset += 1;
            }
            notfound = offset == stop;
            if notfound {
                segment_id += 1;
            }
        }

        if segment_id % 2 == 0 && segment_id + 1 < number_segments {
            stop = (segment_id + 1) * b + sizes[segment_id + 1] as usize;
        }
        if notfound || keys[offset] > key_max {
            return SumResult::default();
        }

        // Backward scan from segment_end for the last element <= key_max.
        let end = {
            let interval_start_segment = segment_id as i64;
            let mut seg = segment_end as i64;
            let mut upper: i64 = -1;
            let mut notfound = true;
            while notfound && seg >= interval_start_segment {
                let (lo, hi) = run_bounds(seg as usize, b, sizes);
                let mut off = hi;
                while off >= lo {
                    if keys[off as usize] <= key_max {
                        upper = off;
                        notfound = false;
                        break;
                    }
                    off -= 1;
                }
                if notfound {
                    seg -= 1;
                }
            }
            (upper + 1) as usize
        };

        if end <= offset {
            return SumResult::default();
        }
        stop = stop.min(end);

        let values = self.storage.values();
        let mut result = SumResult {
            first_key: keys[offset],
            ..SumResult::default()
        };

        while offset < end {
            result.num_elements += (stop - offset) as u64;
            while offset < stop {
                result.sum_keys += keys[offset];
                result.sum_values += values[offset];
                offset += 1;
            }

            // Jump to the next even segment and take its pair as one run.
            segment_id += 1 + usize::from(segment_id % 2 == 0);
            if segment_id < number_segments {
                let size_lhs = sizes[segment_id] as usize;
                let size_rhs = sizes[segment_id + 1] as usize;
                offset = (segment_id + 1) * b - size_lhs;
                stop = end.min(offset + size_lhs + size_rhs);
            }
        }
        result.last_key = keys[end - 1];

        result
    }
}

#[cfg(test)]
mod tests {
    use crate::{IndexConfig, PmaIndex};

    fn filled(n: i64) -> PmaIndex {
        let mut index = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        for key in 1..=n {
            index.insert(key, 10 * key);
        }
        index
    }

    #[test]
    fn test_iter_yields_sorted_pairs() {
        let index = filled(500);
        let pairs: Vec<_> = index.iter().collect();
        assert_eq!(pairs.len(), 500);
        for (i, &(key, value)) in pairs.iter().enumerate() {
            assert_eq!(key, i as i64 + 1);
            assert_eq!(value, 10 * key);
        }
    }

    #[test]
    fn test_iter_on_empty_index() {
        let index = PmaIndex::new().unwrap();
        assert_eq!(index.iter().count(), 0);
    }

    #[test]
    fn test_range_inner_bounds() {
        let index = filled(500);
        let pairs: Vec<_> = index.range(100, 110).collect();
        let expected: Vec<_> = (100..=110).map(|k| (k, 10 * k)).collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_range_bounds_between_keys() {
        let mut index = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        for key in (10..=1000).step_by(10) {
            index.insert(key, key);
        }
        let pairs: Vec<_> = index.range(15, 35).collect();
        assert_eq!(pairs, vec![(20, 20), (30, 30)]);
    }

    #[test]
    fn test_range_outside_keyspace() {
        let index = filled(100);
        assert_eq!(index.range(200, 300).count(), 0);
        assert_eq!(index.range(-50, 0).count(), 0);
        assert_eq!(index.range(50, 40).count(), 0);
    }

    #[test]
    fn test_range_full_keyspace() {
        let index = filled(300);
        assert_eq!(index.range(i64::MIN, i64::MAX).count(), 300);
    }

    #[test]
    fn test_sum_basic() {
        let index = filled(100);
        let sum = index.sum(10, 20);
        assert_eq!(sum.num_elements, 11);
        assert_eq!(sum.sum_keys, 165);
        assert_eq!(sum.sum_values, 1650);
        assert_eq!(sum.first_key, 10);
        assert_eq!(sum.last_key, 20);
    }

    #[test]
    fn test_sum_spanning_many_segments() {
        let index = filled(5000);
        let sum = index.sum(1, 5000);
        assert_eq!(sum.num_elements, 5000);
        assert_eq!(sum.sum_keys, 5000 * 5001 / 2);
        assert_eq!(sum.first_key, 1);
        assert_eq!(sum.last_key, 5000);
    }

    #[test]
    fn test_sum_empty_ranges() {
        let index = filled(100);
        assert_eq!(index.sum(200, 300), Default::default());
        assert_eq!(index.sum(20, 10), Default::default());
        assert_eq!(PmaIndex::new().unwrap().sum(0, 10), Default::default());
    }

    #[test]
    fn test_sum_partial_boundaries() {
        let mut index = PmaIndex::with_config(IndexConfig {
            segment_capacity: 32,
            pages_per_extent: 1,
        })
        .unwrap();
        for key in (0..1000).step_by(7) {
            index.insert(key, 1);
        }
        let sum = index.sum(8, 20);
        // Keys 14 only... 7*2=14 in [8, 20]: 14; also 7*1=7 < 8, 21 > 20.
        assert_eq!(sum.num_elements, 1);
        assert_eq!(sum.first_key, 14);
        assert_eq!(sum.last_key, 14);
    }
}
