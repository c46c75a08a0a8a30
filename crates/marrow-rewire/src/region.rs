//! Contiguous extent-granular memory region.

use marrow_common::{MarrowError, Result, PAGE_SIZE};

/// A contiguous region of memory managed in extent units.
///
/// An extent is `pages_per_extent` pages; the region always holds a whole
/// number of extents and grows by whole extents via [`extend`](Self::extend).
/// Element slots are zero-initialized.
pub struct RewiredRegion<T> {
    /// Backing store for all active extents, contiguous.
    data: Vec<T>,
    /// Elements per extent.
    extent_len: usize,
    /// Number of active extents.
    num_extents: usize,
}

impl<T: Copy + Default> RewiredRegion<T> {
    /// Creates a region of `num_extents` extents.
    pub fn new(pages_per_extent: usize, num_extents: usize) -> Result<Self> {
        if !pages_per_extent.is_power_of_two() {
            return Err(MarrowError::PagesPerExtentNotPowerOfTwo(pages_per_extent));
        }
        if num_extents == 0 {
            return Err(MarrowError::InvalidParameter {
                name: "num_extents".to_string(),
                value: "0".to_string(),
            });
        }
        let extent_bytes = pages_per_extent * PAGE_SIZE;
        debug_assert_eq!(extent_bytes % std::mem::size_of::<T>(), 0);
        let extent_len = extent_bytes / std::mem::size_of::<T>();
        Ok(Self {
            data: vec![T::default(); extent_len * num_extents],
            extent_len,
            num_extents,
        })
    }

    /// Adds `extra_extents` extents at the end of the region.
    pub fn extend(&mut self, extra_extents: usize) {
        self.num_extents += extra_extents;
        self.data
            .resize(self.extent_len * self.num_extents, T::default());
    }

    /// Elements per extent.
    #[inline]
    pub fn extent_len(&self) -> usize {
        self.extent_len
    }

    /// Extent size in bytes.
    #[inline]
    pub fn extent_size_bytes(&self) -> usize {
        self.extent_len * std::mem::size_of::<T>()
    }

    /// Number of active extents.
    #[inline]
    pub fn num_extents(&self) -> usize {
        self.num_extents
    }

    /// Total element capacity of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_region_is_zeroed() {
        let region: RewiredRegion<i64> = RewiredRegion::new(1, 2).unwrap();
        assert_eq!(region.extent_len(), PAGE_SIZE / 8);
        assert_eq!(region.num_extents(), 2);
        assert_eq!(region.len(), 2 * PAGE_SIZE / 8);
        assert!(region.as_slice().iter().all(|&x| x == 0));
    }

    #[test]
    fn test_extent_len_depends_on_element_size() {
        let region: RewiredRegion<u16> = RewiredRegion::new(1, 1).unwrap();
        assert_eq!(region.extent_len(), PAGE_SIZE / 2);
        assert_eq!(region.extent_size_bytes(), PAGE_SIZE);
    }

    #[test]
    fn test_extend_grows_by_whole_extents() {
        let mut region: RewiredRegion<i64> = RewiredRegion::new(1, 1).unwrap();
        region.as_mut_slice()[0] = 42;
        region.extend(3);
        assert_eq!(region.num_extents(), 4);
        assert_eq!(region.len(), 4 * PAGE_SIZE / 8);
        // Existing contents survive the growth.
        assert_eq!(region.as_slice()[0], 42);
        assert!(region.as_slice()[1..].iter().all(|&x| x == 0));
    }

    #[test]
    fn test_rejects_non_power_of_two_pages() {
        let result: Result<RewiredRegion<i64>> = RewiredRegion::new(3, 1);
        assert!(matches!(
            result,
            Err(MarrowError::PagesPerExtentNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn test_rejects_zero_extents() {
        let result: Result<RewiredRegion<i64>> = RewiredRegion::new(1, 0);
        assert!(result.is_err());
    }
}
