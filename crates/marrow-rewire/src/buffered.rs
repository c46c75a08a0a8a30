//! Extent region with spare staging buffers.

use crate::region::RewiredRegion;
use marrow_common::Result;

/// A [`RewiredRegion`] extended with a pool of spare extent buffers.
///
/// The rebalancer redistributes elements extent by extent, right to left.
/// While the read cursor still lies inside the extent being rewritten, the
/// new contents are staged in a spare buffer obtained from
/// [`acquire_buffer`](Self::acquire_buffer); once the cursor has moved past
/// the extent, [`commit_and_release`](Self::commit_and_release) publishes
/// the staged contents into the live region in a single step and returns
/// the allocation to the pool. Until that point the live extent is
/// untouched, so readers of the old contents never observe a partial state.
///
/// Every acquired buffer must be committed before the rebalance returns;
/// [`used_buffers`](Self::used_buffers) tracks the outstanding count.
pub struct BufferedRewiredRegion<T> {
    region: RewiredRegion<T>,
    /// Spare extent-sized allocations available for staging.
    spares: Vec<Vec<T>>,
    /// Number of buffers handed out and not yet committed.
    used_buffers: usize,
}

impl<T: Copy + Default> BufferedRewiredRegion<T> {
    /// Creates a region of `num_extents` extents with one spare buffer.
    pub fn new(pages_per_extent: usize, num_extents: usize) -> Result<Self> {
        let region = RewiredRegion::new(pages_per_extent, num_extents)?;
        let spare = vec![T::default(); region.extent_len()];
        Ok(Self {
            region,
            spares: vec![spare],
            used_buffers: 0,
        })
    }

    /// Hands out a spare extent-sized buffer for staging.
    ///
    /// Allocates a fresh buffer when the pool is exhausted. Contents are
    /// unspecified; the caller overwrites the part it uses.
    pub fn acquire_buffer(&mut self) -> Vec<T> {
        self.used_buffers += 1;
        self.spares
            .pop()
            .unwrap_or_else(|| vec![T::default(); self.region.extent_len()])
    }

    /// Publishes a staged buffer into extent `extent_id` and returns the
    /// allocation to the spare pool.
    ///
    /// This is the commit point: before the call, the live extent still
    /// holds its previous contents.
    pub fn commit_and_release(&mut self, extent_id: usize, buffer: Vec<T>) {
        debug_assert!(self.used_buffers > 0, "no buffer outstanding");
        debug_assert_eq!(buffer.len(), self.region.extent_len());
        let extent_len = self.region.extent_len();
        let start = extent_id * extent_len;
        self.region.as_mut_slice()[start..start + extent_len].copy_from_slice(&buffer);
        self.spares.push(buffer);
        self.used_buffers -= 1;
    }

    /// Number of acquired buffers not yet committed.
    #[inline]
    pub fn used_buffers(&self) -> usize {
        self.used_buffers
    }

    /// Adds `extra_extents` extents at the end of the region.
    pub fn extend(&mut self, extra_extents: usize) {
        self.region.extend(extra_extents);
    }

    /// Elements per extent.
    #[inline]
    pub fn extent_len(&self) -> usize {
        self.region.extent_len()
    }

    /// Extent size in bytes.
    #[inline]
    pub fn extent_size_bytes(&self) -> usize {
        self.region.extent_size_bytes()
    }

    /// Number of active extents.
    #[inline]
    pub fn num_extents(&self) -> usize {
        self.region.num_extents()
    }

    /// Total element capacity of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.region.as_slice()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.region.as_mut_slice()
    }
}
