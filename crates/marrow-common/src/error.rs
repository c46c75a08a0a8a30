//! Error types for Marrow.

use thiserror::Error;

/// Result type alias using MarrowError.
pub type Result<T> = std::result::Result<T, MarrowError>;

/// Errors that can occur in Marrow operations.
#[derive(Debug, Error)]
pub enum MarrowError {
    // Configuration errors
    #[error("Segment capacity out of range: {actual} (allowed {min}..={max})")]
    SegmentCapacityOutOfRange {
        actual: usize,
        min: usize,
        max: usize,
    },

    #[error("Segment capacity must divide the page size: {segment_bytes} bytes per segment, {page_size} bytes per page")]
    SegmentCapacityPageMismatch {
        segment_bytes: usize,
        page_size: usize,
    },

    #[error("Pages per extent must be a power of two, got {0}")]
    PagesPerExtentNotPowerOfTwo(usize),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Integrity errors (reported by validate())
    #[error("Sort order violated in segment {segment_id}: {previous} > {current}")]
    OrderViolation {
        segment_id: usize,
        previous: i64,
        current: i64,
    },

    #[error("Separator mismatch for segment {segment_id}: minimum {minimum}, separator {separator}")]
    SeparatorMismatch {
        segment_id: usize,
        minimum: i64,
        separator: i64,
    },

    #[error("Cardinality mismatch: registered {registered}, counted {counted}")]
    CardinalityMismatch { registered: usize, counted: usize },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
