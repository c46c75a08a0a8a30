//! Segmented sparse-array storage for the packed memory array.
//!
//! Elements live in two parallel `i64` arrays partitioned into segments of
//! `segment_capacity` slots. Even-numbered segments pack their elements
//! against the right edge, odd-numbered segments against the left edge, so
//! that each (even, odd) pair stores its elements in one contiguous run.
//! A third array records the cardinality of every segment.

use marrow_common::size::log2;
use marrow_common::{IndexConfig, Result, PAGE_SIZE};
use marrow_rewire::{BufferedRewiredRegion, RewiredRegion};

/// Backing arrays for the keys, values and per-segment cardinalities.
///
/// Small arrays live in plain heap allocations; once the element arrays
/// span at least one extent the workspace switches to extent regions, which
/// grow in place and supply the staging buffers used by the rewired spread.
pub(crate) enum Workspace {
    Plain {
        keys: Box<[i64]>,
        values: Box<[i64]>,
        sizes: Box<[u16]>,
    },
    Rewired {
        keys: BufferedRewiredRegion<i64>,
        values: BufferedRewiredRegion<i64>,
        sizes: RewiredRegion<u16>,
    },
}

impl Workspace {
    /// Allocates a workspace for `num_segments` segments.
    ///
    /// At least two cardinality slots are always allocated; the second acts
    /// as a zero sentinel so that pair-at-a-time scans need no special case
    /// when only one segment exists.
    pub(crate) fn alloc(
        num_segments: usize,
        segment_capacity: usize,
        pages_per_extent: usize,
    ) -> Self {
        let extent_bytes = pages_per_extent * PAGE_SIZE;
        let elts = num_segments * segment_capacity;
        let elts_bytes = elts * std::mem::size_of::<i64>();
        let sizes_len = num_segments.max(2);

        if elts_bytes >= extent_bytes {
            let elts_extents = elts_bytes / extent_bytes;
            let sizes_bytes = sizes_len * std::mem::size_of::<u16>();
            let sizes_extents = (sizes_bytes / extent_bytes).max(1);
            let keys = BufferedRewiredRegion::new(pages_per_extent, elts_extents)
                .expect("extent geometry validated at construction");
            let values = BufferedRewiredRegion::new(pages_per_extent, elts_extents)
                .expect("extent geometry validated at construction");
            let sizes = RewiredRegion::new(pages_per_extent, sizes_extents)
                .expect("extent geometry validated at construction");
            Workspace::Rewired {
                keys,
                values,
                sizes,
            }
        } else {
            Workspace::Plain {
                keys: vec![0; elts].into_boxed_slice(),
                values: vec![0; elts].into_boxed_slice(),
                sizes: vec![0; sizes_len].into_boxed_slice(),
            }
        }
    }

    /// The three parallel arrays of this workspace, read-only.
    pub(crate) fn borrow_parts(&self) -> (&[i64], &[i64], &[u16]) {
        match self {
            Workspace::Plain {
                keys,
                values,
                sizes,
            } => (keys, values, sizes),
            Workspace::Rewired {
                keys,
                values,
                sizes,
            } => (keys.as_slice(), values.as_slice(), sizes.as_slice()),
        }
    }
}

/// The sparse-array storage: geometry scalars plus the backing workspace.
pub(crate) struct Storage {
    /// Slots per segment (power of two).
    pub(crate) segment_capacity: usize,
    /// Pages grouped into one rewiring extent.
    pub(crate) pages_per_extent: usize,
    /// Number of elements currently stored.
    pub(crate) cardinality: usize,
    /// Total slots: `number_segments * segment_capacity`.
    pub(crate) capacity: usize,
    /// Number of segments (power of two).
    pub(crate) number_segments: usize,
    /// Height of the calibrator tree: `log2(number_segments) + 1`.
    pub(crate) height: usize,
    pub(crate) workspace: Workspace,
}

impl Storage {
    /// Creates single-segment storage for a validated configuration.
    pub(crate) fn new(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let segment_capacity = config.effective_segment_capacity();
        let pages_per_extent = config.pages_per_extent;
        let workspace = Workspace::alloc(1, segment_capacity, pages_per_extent);
        Ok(Self {
            segment_capacity,
            pages_per_extent,
            cardinality: 0,
            capacity: segment_capacity,
            number_segments: 1,
            height: 1,
            workspace,
        })
    }

    #[inline]
    pub(crate) fn keys(&self) -> &[i64] {
        match &self.workspace {
            Workspace::Plain { keys, .. } => keys,
            Workspace::Rewired { keys, .. } => keys.as_slice(),
        }
    }

    #[inline]
    pub(crate) fn values(&self) -> &[i64] {
        match &self.workspace {
            Workspace::Plain { values, .. } => values,
            Workspace::Rewired { values, .. } => values.as_slice(),
        }
    }

    #[inline]
    pub(crate) fn sizes(&self) -> &[u16] {
        match &self.workspace {
            Workspace::Plain { sizes, .. } => sizes,
            Workspace::Rewired { sizes, .. } => sizes.as_slice(),
        }
    }

    /// Mutable access to the three parallel arrays at once.
    #[inline]
    pub(crate) fn parts_mut(&mut self) -> (&mut [i64], &mut [i64], &mut [u16]) {
        match &mut self.workspace {
            Workspace::Plain {
                keys,
                values,
                sizes,
            } => (keys, values, sizes),
            Workspace::Rewired {
                keys,
                values,
                sizes,
            } => (
                keys.as_mut_slice(),
                values.as_mut_slice(),
                sizes.as_mut_slice(),
            ),
        }
    }

    #[inline]
    pub(crate) fn is_rewired(&self) -> bool {
        matches!(self.workspace, Workspace::Rewired { .. })
    }

    /// Elements per extent, when the workspace is extent-backed.
    #[inline]
    pub(crate) fn extent_len(&self) -> Option<usize> {
        match &self.workspace {
            Workspace::Plain { .. } => None,
            Workspace::Rewired { keys, .. } => Some(keys.extent_len()),
        }
    }

    /// Extent size in bytes of the element regions.
    #[inline]
    pub(crate) fn extent_size_bytes(&self) -> usize {
        self.pages_per_extent * PAGE_SIZE
    }

    /// Whether the extent-granular spread can run: it rewrites extents
    /// pair by pair, so an extent must hold at least one segment pair.
    #[inline]
    pub(crate) fn rewired_spread_available(&self) -> bool {
        self.is_rewired()
            && self
                .extent_len()
                .is_some_and(|extent_len| extent_len >= 2 * self.segment_capacity)
    }

    /// Outstanding staging buffers across the key and value regions.
    pub(crate) fn used_buffers(&self) -> usize {
        match &self.workspace {
            Workspace::Plain { .. } => 0,
            Workspace::Rewired { keys, values, .. } => keys.used_buffers() + values.used_buffers(),
        }
    }

    /// Hands out one staging buffer per element region.
    pub(crate) fn acquire_buffers(&mut self) -> (Vec<i64>, Vec<i64>) {
        match &mut self.workspace {
            Workspace::Plain { .. } => unreachable!("staging requires a rewired workspace"),
            Workspace::Rewired { keys, values, .. } => {
                (keys.acquire_buffer(), values.acquire_buffer())
            }
        }
    }

    /// Commits staged key/value buffers into the given absolute extent.
    pub(crate) fn commit_buffers(
        &mut self,
        extent_id: usize,
        key_buffer: Vec<i64>,
        value_buffer: Vec<i64>,
    ) {
        match &mut self.workspace {
            Workspace::Plain { .. } => unreachable!("staging requires a rewired workspace"),
            Workspace::Rewired { keys, values, .. } => {
                keys.commit_and_release(extent_id, key_buffer);
                values.commit_and_release(extent_id, value_buffer);
            }
        }
    }

    /// Grows the rewired workspace by `num_segments_to_add` segments and
    /// refreshes the geometry scalars.
    pub(crate) fn extend(&mut self, num_segments_to_add: usize) {
        let bytes_per_segment = self.segment_capacity * std::mem::size_of::<i64>();
        let bytes_per_size = std::mem::size_of::<u16>();
        let bytes_per_extent = self.extent_size_bytes();

        let segments_before = self.number_segments;
        let segments_after = segments_before + num_segments_to_add;

        let extents_for = |bytes: usize| (bytes + bytes_per_extent - 1) / bytes_per_extent;
        let elts_extents_current = extents_for(segments_before * bytes_per_segment);
        let elts_extents_total = extents_for(segments_after * bytes_per_segment);
        let sizes_extents_current = extents_for(segments_before * bytes_per_size).max(1);
        let sizes_extents_total = extents_for(segments_after * bytes_per_size).max(1);

        match &mut self.workspace {
            Workspace::Plain { .. } => unreachable!("extend requires a rewired workspace"),
            Workspace::Rewired {
                keys,
                values,
                sizes,
            } => {
                if elts_extents_total > elts_extents_current {
                    keys.extend(elts_extents_total - elts_extents_current);
                    values.extend(elts_extents_total - elts_extents_current);
                }
                if sizes_extents_total > sizes_extents_current {
                    sizes.extend(sizes_extents_total - sizes_extents_current);
                }
            }
        }

        self.number_segments = segments_after;
        self.capacity = segments_after * self.segment_capacity;
        self.height = log2(segments_after) + 1;
    }

    /// Minimum key of a non-empty segment, read from its packed edge.
    #[inline]
    pub(crate) fn get_minimum(&self, segment_id: usize) -> i64 {
        let b = self.segment_capacity;
        let sizes = self.sizes();
        debug_assert!(segment_id < self.number_segments);
        debug_assert!(sizes[segment_id] > 0, "segment {segment_id} is empty");
        if segment_id % 2 == 0 {
            self.keys()[(segment_id + 1) * b - sizes[segment_id] as usize]
        } else {
            self.keys()[segment_id * b]
        }
    }

    /// Inserts into a segment with free space, sliding elements to keep the
    /// packed run sorted. Returns true when the new key became the segment
    /// minimum.
    pub(crate) fn insert_into_segment(&mut self, segment_id: usize, key: i64, value: i64) -> bool {
        let b = self.segment_capacity;
        let (keys, values, sizes) = self.parts_mut();
        let sz = sizes[segment_id] as usize;
        debug_assert!(sz < b, "segment {segment_id} is full");
        let base = segment_id * b;

        let minimum;
        if segment_id % 2 == 0 {
            // Packed right: grow the run leftwards, sliding smaller keys left.
            let stop = b - 1;
            let start = b - sz - 1;
            let mut i = start;
            while i < stop && keys[base + i + 1] < key {
                keys[base + i] = keys[base + i + 1];
                i += 1;
            }
            keys[base + i] = key;
            for j in start..i {
                values[base + j] = values[base + j + 1];
            }
            values[base + i] = value;
            minimum = i == start;
        } else {
            // Packed left: grow the run rightwards, sliding larger keys right.
            let mut i = sz;
            while i > 0 && keys[base + i - 1] > key {
                keys[base + i] = keys[base + i - 1];
                i -= 1;
            }
            keys[base + i] = key;
            let mut j = sz;
            while j > i {
                values[base + j] = values[base + j - 1];
                j -= 1;
            }
            values[base + i] = value;
            minimum = i == 0;
        }

        sizes[segment_id] += 1;
        self.cardinality += 1;
        minimum
    }
}
