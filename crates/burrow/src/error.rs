//! Error and Result types for time series operations.

use crate::series::Timestamp;
use thiserror::Error;

/// A convenience `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, SeriesError>;

/// The error type for time series operations.
#[derive(Debug, Error)]
pub enum SeriesError {
    /// The owning document does not exist in the document store.
    #[error("Document missing: {0}")]
    DocumentMissing(String),

    /// Tag or value encoding violates storage limits, or a named value does
    /// not fit the registered schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A segment was placed over the range of an existing one.
    ///
    /// This is an internal invariant breach and indicates a bug.
    #[error(
        "Overlap violation: segment [{start}, {end}] intersects existing [{existing_start}, {existing_end}]"
    )]
    OverlapViolation {
        /// First timestamp of the rejected segment.
        start: Timestamp,
        /// Last timestamp of the rejected segment.
        end: Timestamp,
        /// First timestamp of the segment already in place.
        existing_start: Timestamp,
        /// Last timestamp of the segment already in place.
        existing_end: Timestamp,
    },

    /// A range with `from > to` was requested.
    #[error("Invalid range: from {from} is after to {to}")]
    InvalidRange {
        /// Requested lower bound.
        from: Timestamp,
        /// Requested upper bound.
        to: Timestamp,
    },

    /// A persisted segment failed validation while being decoded.
    #[error("Corrupt segment starting at {start}: {reason}")]
    CorruptSegment {
        /// Start timestamp recorded in the segment header.
        start: Timestamp,
        /// What failed.
        reason: String,
    },

    /// A rollup granularity is zero, negative, or could not be parsed.
    #[error("Invalid granularity: {0}")]
    InvalidGranularity(String),
}

impl SeriesError {
    pub(crate) fn corrupt(start: Timestamp, reason: impl Into<String>) -> Self {
        SeriesError::CorruptSegment {
            start,
            reason: reason.into(),
        }
    }

    pub(crate) fn check_range(from: Timestamp, to: Timestamp) -> Result<()> {
        if from > to {
            return Err(SeriesError::InvalidRange { from, to });
        }
        Ok(())
    }
}
