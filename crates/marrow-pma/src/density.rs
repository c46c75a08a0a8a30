//! Density thresholds for the calibrator tree.
//!
//! Every window of the calibrator tree carries a lower and an upper density
//! bound. The bands are widest at the leaves and tighten linearly towards
//! the root, so that local crowding is absorbed by small windows and only
//! sustained pressure propagates upwards into larger rebalances.

/// Leaf-level lower density bound.
const RHO_LEAVES: f64 = 0.08;
/// Root-level lower density bound.
const RHO_ROOT: f64 = 0.3;
/// Root-level upper density bound.
const THETA_ROOT: f64 = 0.75;
/// Leaf-level upper density bound.
const THETA_LEAVES: f64 = 0.92;

/// Per-level density bounds, cached for the current tree height.
///
/// The cache is rebuilt whenever the tree height changes (that is, on
/// resize); between resizes every lookup is a table read.
pub(crate) struct DensityBounds {
    tree_height: usize,
    /// Entry `h - 1` holds the bounds for calibrator-tree height `h`.
    cache: Vec<(f64, f64)>,
}

impl DensityBounds {
    pub(crate) fn new() -> Self {
        Self {
            tree_height: 0,
            cache: Vec::new(),
        }
    }

    /// Returns `(rho, theta)` for a window at `node_height` in a tree of
    /// `tree_height` levels.
    pub(crate) fn thresholds(&mut self, node_height: usize, tree_height: usize) -> (f64, f64) {
        debug_assert!(node_height >= 1 && node_height <= tree_height);
        if tree_height != self.tree_height {
            self.recompute(tree_height);
        }
        self.cache[node_height - 1]
    }

    fn recompute(&mut self, tree_height: usize) {
        self.tree_height = tree_height;
        self.cache.clear();
        if tree_height == 1 {
            self.cache.push((0.0, 1.0));
            return;
        }
        for h in 1..=tree_height {
            let scale = (tree_height - h) as f64 / (tree_height - 1) as f64;
            let rho = RHO_ROOT - (RHO_ROOT - RHO_LEAVES) * scale;
            let theta = THETA_ROOT + (THETA_LEAVES - THETA_ROOT) * scale;
            self.cache.push((rho, theta));
        }
    }

    /// Upper density bound at the leaves.
    #[inline]
    pub(crate) fn upper_threshold_leaves(&self) -> f64 {
        THETA_LEAVES
    }

    /// Upper density bound at the root.
    #[inline]
    pub(crate) fn upper_threshold_root(&self) -> f64 {
        THETA_ROOT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let mut bounds = DensityBounds::new();
        let (rho, theta) = bounds.thresholds(1, 8);
        assert!((rho - RHO_LEAVES).abs() < 1e-9);
        assert!((theta - THETA_LEAVES).abs() < 1e-9);

        let (rho, theta) = bounds.thresholds(8, 8);
        assert!((rho - RHO_ROOT).abs() < 1e-9);
        assert!((theta - THETA_ROOT).abs() < 1e-9);
    }

    #[test]
    fn test_monotone_tightening() {
        let mut bounds = DensityBounds::new();
        let tree_height = 12;
        let mut previous = bounds.thresholds(1, tree_height);
        for h in 2..=tree_height {
            let current = bounds.thresholds(h, tree_height);
            assert!(current.0 >= previous.0, "lower bound must not loosen");
            assert!(current.1 <= previous.1, "upper bound must not loosen");
            assert!(current.1 > current.0);
            previous = current;
        }
    }

    #[test]
    fn test_degenerate_single_segment_tree() {
        let mut bounds = DensityBounds::new();
        assert_eq!(bounds.thresholds(1, 1), (0.0, 1.0));
    }

    #[test]
    fn test_cache_tracks_tree_height() {
        let mut bounds = DensityBounds::new();
        let before = bounds.thresholds(2, 4);
        let _ = bounds.thresholds(2, 8);
        let after = bounds.thresholds(2, 4);
        assert_eq!(before, after);
    }

    #[test]
    fn test_two_level_tree() {
        let mut bounds = DensityBounds::new();
        let (rho1, theta1) = bounds.thresholds(1, 2);
        let (rho2, theta2) = bounds.thresholds(2, 2);
        assert!((rho1 - RHO_LEAVES).abs() < 1e-9);
        assert!((theta1 - THETA_LEAVES).abs() < 1e-9);
        assert!((rho2 - RHO_ROOT).abs() < 1e-9);
        assert!((theta2 - THETA_ROOT).abs() < 1e-9);
    }
}
