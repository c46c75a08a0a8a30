//! Size arithmetic shared by the storage and rewiring layers.

/// Virtual memory page size in bytes assumed by the extent layout.
pub const PAGE_SIZE: usize = 4096;

/// Returns the smallest power of two greater than or equal to `n`.
///
/// `hyperceil(0)` is defined as 1 so that capacities derived from it are
/// always usable as array sizes.
#[inline]
pub fn hyperceil(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Returns `ceil(a / b)` for positive divisors.
#[inline]
pub fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Base-2 logarithm of a power of two.
#[inline]
pub fn log2(n: usize) -> usize {
    debug_assert!(n.is_power_of_two());
    n.trailing_zeros() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyperceil() {
        assert_eq!(hyperceil(0), 1);
        assert_eq!(hyperceil(1), 1);
        assert_eq!(hyperceil(2), 2);
        assert_eq!(hyperceil(3), 4);
        assert_eq!(hyperceil(64), 64);
        assert_eq!(hyperceil(65), 128);
        assert_eq!(hyperceil(1000), 1024);
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(0, 4), 0);
        assert_eq!(div_ceil(1, 4), 1);
        assert_eq!(div_ceil(4, 4), 1);
        assert_eq!(div_ceil(5, 4), 2);
    }

    #[test]
    fn test_log2() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(2), 1);
        assert_eq!(log2(1024), 10);
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
    }
}
