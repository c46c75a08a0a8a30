//! Configuration structures for Marrow.

use crate::error::{MarrowError, Result};
use crate::size::{hyperceil, PAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Minimum allowed segment capacity, in elements.
pub const MIN_SEGMENT_CAPACITY: usize = 32;

/// Maximum allowed segment capacity: cardinalities are stored as u16.
pub const MAX_SEGMENT_CAPACITY: usize = u16::MAX as usize;

/// Construction parameters for a packed-memory-array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of element slots per segment. Rounded up to a power of two;
    /// the resulting byte size must divide the page size.
    pub segment_capacity: usize,
    /// Number of pages grouped into one rewiring extent. Must be a power
    /// of two.
    pub pages_per_extent: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            segment_capacity: 64,
            pages_per_extent: 1,
        }
    }
}

impl IndexConfig {
    /// Creates a config with the given segment capacity and one page per
    /// extent.
    pub fn with_segment_capacity(segment_capacity: usize) -> Self {
        Self {
            segment_capacity,
            ..Default::default()
        }
    }

    /// Segment capacity after rounding up to a power of two.
    pub fn effective_segment_capacity(&self) -> usize {
        hyperceil(self.segment_capacity)
    }

    /// Extent size in bytes.
    pub fn extent_size_bytes(&self) -> usize {
        self.pages_per_extent * PAGE_SIZE
    }

    /// Checks the construction constraints.
    ///
    /// The segment capacity (rounded up) must lie in
    /// [`MIN_SEGMENT_CAPACITY`, `MAX_SEGMENT_CAPACITY`] and its byte size
    /// must divide the page size; the pages per extent must be a power of
    /// two.
    pub fn validate(&self) -> Result<()> {
        let capacity = self.effective_segment_capacity();
        if !(MIN_SEGMENT_CAPACITY..=MAX_SEGMENT_CAPACITY).contains(&capacity) {
            return Err(MarrowError::SegmentCapacityOutOfRange {
                actual: capacity,
                min: MIN_SEGMENT_CAPACITY,
                max: MAX_SEGMENT_CAPACITY,
            });
        }
        let segment_bytes = capacity * std::mem::size_of::<i64>();
        if PAGE_SIZE % segment_bytes != 0 {
            return Err(MarrowError::SegmentCapacityPageMismatch {
                segment_bytes,
                page_size: PAGE_SIZE,
            });
        }
        if !self.pages_per_extent.is_power_of_two() {
            return Err(MarrowError::PagesPerExtentNotPowerOfTwo(
                self.pages_per_extent,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        assert_eq!(config.segment_capacity, 64);
        assert_eq!(config.pages_per_extent, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_segment_capacity_rounds_up() {
        let config = IndexConfig::with_segment_capacity(48);
        assert_eq!(config.effective_segment_capacity(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_segment_capacity_too_small() {
        let config = IndexConfig::with_segment_capacity(16);
        assert!(matches!(
            config.validate(),
            Err(MarrowError::SegmentCapacityOutOfRange { .. })
        ));
    }

    #[test]
    fn test_segment_capacity_exceeds_page() {
        // 1024 slots * 8 bytes = 8192 bytes > 4096-byte page.
        let config = IndexConfig::with_segment_capacity(1024);
        assert!(matches!(
            config.validate(),
            Err(MarrowError::SegmentCapacityPageMismatch { .. })
        ));
    }

    #[test]
    fn test_pages_per_extent_must_be_power_of_two() {
        let config = IndexConfig {
            segment_capacity: 64,
            pages_per_extent: 3,
        };
        assert!(matches!(
            config.validate(),
            Err(MarrowError::PagesPerExtentNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn test_extent_size_bytes() {
        let config = IndexConfig {
            segment_capacity: 64,
            pages_per_extent: 512,
        };
        assert_eq!(config.extent_size_bytes(), 2 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let original = IndexConfig {
            segment_capacity: 128,
            pages_per_extent: 4,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: IndexConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
