//! Static separator index for the Marrow storage layer.
//!
//! The packed memory array keeps its elements in a fixed number of segments;
//! this index records one *separator key* per segment (the minimum key
//! stored in it) and answers "which segment should contain key k" in
//! O(log S). The segment count only changes through [`rebuild`], which the
//! storage layer invokes on resize, so the index itself is static between
//! rebalances.
//!
//! [`rebuild`]: StaticIndex::rebuild

/// Ordered separator index over segment minima.
///
/// Lookups use a branchless binary search: the loop bounds are updated with
/// arithmetic on the comparison result instead of branches, which keeps the
/// search pipeline-friendly on the hot path.
pub struct StaticIndex {
    /// Separator key per segment; entry `s` is the minimum key of segment `s`.
    separators: Vec<i64>,
}

impl StaticIndex {
    /// Creates an index over `num_segments` segments, all separators set to
    /// `i64::MIN`.
    pub fn new(num_segments: usize) -> Self {
        Self {
            separators: vec![i64::MIN; num_segments.max(1)],
        }
    }

    /// Number of segments covered.
    #[inline]
    pub fn num_segments(&self) -> usize {
        self.separators.len()
    }

    /// Resets the index to `num_segments` segments. Separators are
    /// unspecified until set again.
    pub fn rebuild(&mut self, num_segments: usize) {
        self.separators.clear();
        self.separators.resize(num_segments.max(1), i64::MIN);
    }

    /// Records `key` as the minimum of segment `segment_id`.
    #[inline]
    pub fn set_separator_key(&mut self, segment_id: usize, key: i64) {
        self.separators[segment_id] = key;
    }

    /// Returns the separator recorded for `segment_id`.
    #[inline]
    pub fn separator_key(&self, segment_id: usize) -> i64 {
        self.separators[segment_id]
    }

    /// Number of separators strictly less than `key`.
    #[inline]
    fn rank_lt(&self, key: i64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.separators.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let go_right = (self.separators[mid] < key) as usize;
            lo = go_right * (mid + 1) + (1 - go_right) * lo;
            hi = (1 - go_right) * mid + go_right * hi;
        }
        lo
    }

    /// Number of separators less than or equal to `key`.
    #[inline]
    fn rank_leq(&self, key: i64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.separators.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let go_right = (self.separators[mid] <= key) as usize;
            lo = go_right * (mid + 1) + (1 - go_right) * lo;
            hi = (1 - go_right) * mid + go_right * hi;
        }
        lo
    }

    /// Returns the segment that should contain `key`: the rightmost segment
    /// whose separator is ≤ `key`, or 0 when `key` precedes every separator.
    #[inline]
    pub fn find(&self, key: i64) -> usize {
        self.rank_leq(key).saturating_sub(1)
    }

    /// Leftmost candidate segment for a scan over `[key, ∞)`.
    #[inline]
    pub fn find_first(&self, key: i64) -> usize {
        let p = self.rank_lt(key);
        if p < self.separators.len() && self.separators[p] == key {
            p
        } else {
            p.saturating_sub(1)
        }
    }

    /// Rightmost candidate segment for a scan over `(-∞, key]`.
    #[inline]
    pub fn find_last(&self, key: i64) -> usize {
        self.rank_leq(key).saturating_sub(1)
    }

    /// Bytes held by this index.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.separators.capacity() * std::mem::size_of::<i64>()
    }
}
