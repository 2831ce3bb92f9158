//! Storage primitives: entries, segments, the per-series index, and the
//! shared tag and schema tables.

pub mod compaction;
pub mod gorilla;
pub mod index;
pub mod schema;
pub mod segment;
pub mod tags;

pub use gorilla::{TimestampDecoder, TimestampEncoder, ValueDecoder, ValueEncoder};
pub use index::{SegmentDescriptor, SegmentSlot, SeriesIndex};
pub use schema::{FromNamedValues, NamedValues, SchemaRegistry, SchemaRegistryBuilder, ValueSchema};
pub use segment::{
    decode_segment, encode_segment, SegmentData, SegmentHeader, TailBuffer, TailView, HEADER_SIZE,
};
pub use tags::{TagId, TagTable};

use std::sync::Arc;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Closed time range `[from, to]`.
///
/// Both ends are inclusive. `TimeRange::all()` spans the whole timestamp
/// domain and stands in for `-infinity..+infinity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// First timestamp in range.
    pub from: Timestamp,
    /// Last timestamp in range.
    pub to: Timestamp,
}

impl TimeRange {
    /// Creates a range without validating it; see [`TimeRange::checked`].
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    /// Creates a range, rejecting `from > to`.
    pub fn checked(from: Timestamp, to: Timestamp) -> crate::Result<Self> {
        crate::SeriesError::check_range(from, to)?;
        Ok(Self { from, to })
    }

    /// The range covering every representable timestamp.
    pub fn all() -> Self {
        Self {
            from: Timestamp::MIN,
            to: Timestamp::MAX,
        }
    }

    /// The degenerate range holding a single timestamp.
    pub fn at(ts: Timestamp) -> Self {
        Self { from: ts, to: ts }
    }

    /// Returns true if `ts` lies in the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && ts <= self.to
    }

    /// Returns true if both ranges share at least one timestamp.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Returns true if `other` lies entirely inside this range.
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.from <= other.from && other.to <= self.to
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// A stored entry: timestamp, interned tag, and value array.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Interned tag, if any.
    pub tag: Option<TagId>,
    /// Raw values; arity is not enforced against any schema.
    pub values: Vec<f64>,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(timestamp: Timestamp, tag: Option<TagId>, values: Vec<f64>) -> Self {
        Self {
            timestamp,
            tag,
            values,
        }
    }
}

/// An entry as handed to callers, with the tag resolved to its string.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesEntry {
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Tag string, if any.
    pub tag: Option<Arc<str>>,
    /// Raw values.
    pub values: Vec<f64>,
    /// True when the entry is a pre-aggregated rollup.
    pub is_rollup: bool,
}

impl TimeSeriesEntry {
    /// Builds the public form of a stored entry.
    pub fn resolve(entry: &Entry, tags: &TagTable, is_rollup: bool) -> Self {
        Self {
            timestamp: entry.timestamp,
            tag: entry.tag.and_then(|id| tags.resolve(id)),
            values: entry.values.clone(),
            is_rollup,
        }
    }

    /// Returns the value at `slot`, if present.
    pub fn value(&self, slot: usize) -> Option<f64> {
        self.values.get(slot).copied()
    }

    /// Returns the tag as a string slice.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

/// Aligns `ts` down to the start of its `width`-wide bucket, counting from
/// the Unix epoch. Works for timestamps before the epoch; the first bucket
/// of the domain is clamped at `Timestamp::MIN`.
pub fn align_to_epoch(ts: Timestamp, width: i64) -> Timestamp {
    ts.saturating_sub(ts.rem_euclid(width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_inclusive_bounds() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }

    #[test]
    fn test_time_range_intersects() {
        let range = TimeRange::new(10, 20);
        assert!(range.intersects(&TimeRange::new(20, 30)));
        assert!(range.intersects(&TimeRange::new(0, 10)));
        assert!(range.intersects(&TimeRange::new(12, 14)));
        assert!(!range.intersects(&TimeRange::new(21, 30)));
        assert!(TimeRange::all().intersects(&range));
    }

    #[test]
    fn test_checked_rejects_inverted_range() {
        assert!(TimeRange::checked(5, 4).is_err());
        assert!(TimeRange::checked(5, 5).is_ok());
    }

    #[test]
    fn test_align_to_epoch() {
        let hour = 3600 * NANOS_PER_SECOND;
        assert_eq!(align_to_epoch(0, hour), 0);
        assert_eq!(align_to_epoch(hour - 1, hour), 0);
        assert_eq!(align_to_epoch(hour, hour), hour);
        assert_eq!(align_to_epoch(-1, hour), -hour);
    }
}
