//! Segment-level distribution statistics.

use crate::PmaIndex;

/// Distribution of per-segment cardinalities and of the memory gaps
/// between consecutive segment pairs.
///
/// The gap between two pairs is the number of unused bytes from the end of
/// one pair's packed run to the start of the next pair's run; it measures
/// how much slack the rebalancer currently maintains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentStatistics {
    pub num_segments: usize,
    pub cardinality_min: usize,
    pub cardinality_max: usize,
    pub cardinality_avg: f64,
    pub cardinality_stddev: f64,
    pub cardinality_median: f64,
    pub gap_min_bytes: usize,
    pub gap_max_bytes: usize,
    pub gap_avg_bytes: f64,
    pub gap_stddev_bytes: f64,
    pub gap_median_bytes: f64,
}

fn median(sorted: &[usize]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    }
}

fn stddev(values: &[usize], avg: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|&v| (v as f64) * (v as f64)).sum();
    (sum_sq / values.len() as f64 - avg * avg).max(0.0).sqrt()
}

impl PmaIndex {
    /// Computes the current segment statistics.
    pub fn segment_statistics(&self) -> SegmentStatistics {
        let b = self.storage.segment_capacity;
        let number_segments = self.storage.number_segments;
        let sizes = self.storage.sizes();
        let element_bytes = std::mem::size_of::<i64>();

        let mut cardinalities = Vec::with_capacity(number_segments);
        let mut gaps = Vec::with_capacity(number_segments / 2);
        let mut gap_start = 0usize;

        for segment_id in 0..number_segments {
            let sz = sizes[segment_id] as usize;
            if segment_id > 0 {
                if segment_id % 2 == 0 {
                    // Distance from the end of the previous pair's run to
                    // the start of this pair's run.
                    let gap_end = 2 * b - sz;
                    gaps.push((gap_end - gap_start) * element_bytes);
                } else {
                    gap_start = sz;
                }
            }
            cardinalities.push(sz);
        }

        let cardinality_avg = self.storage.cardinality as f64 / number_segments as f64;
        let cardinality_stddev = stddev(&cardinalities, cardinality_avg);
        cardinalities.sort_unstable();

        let mut stats = SegmentStatistics {
            num_segments: number_segments,
            cardinality_min: *cardinalities.first().unwrap_or(&0),
            cardinality_max: *cardinalities.last().unwrap_or(&0),
            cardinality_avg,
            cardinality_stddev,
            cardinality_median: median(&cardinalities),
            ..SegmentStatistics::default()
        };

        if !gaps.is_empty() {
            let gap_avg = gaps.iter().sum::<usize>() as f64 / gaps.len() as f64;
            stats.gap_avg_bytes = gap_avg;
            stats.gap_stddev_bytes = stddev(&gaps, gap_avg);
            gaps.sort_unstable();
            stats.gap_min_bytes = gaps[0];
            stats.gap_max_bytes = *gaps.last().unwrap();
            stats.gap_median_bytes = median(&gaps);
        }

        stats
    }
}
