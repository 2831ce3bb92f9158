//! Engine configuration.

use crate::series::segment::MAX_VALUES_PER_ENTRY;

/// Default number of entries a segment holds before it seals or splits.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 2048;

/// Default maximum number of values per entry.
pub const DEFAULT_MAX_VALUE_SLOTS: usize = 32;

/// Default maximum tag length in bytes.
pub const DEFAULT_MAX_TAG_LENGTH: usize = 255;

/// Default fill ratio below which a segment is merged after a deletion.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.25;

// Rollup entries carry six values per raw slot.
const VALUE_SLOTS_LIMIT: usize = MAX_VALUES_PER_ENTRY / 6;

/// Configuration for the time series engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum entries per segment.
    ///
    /// The open segment seals when full; a sealed segment that grows past
    /// this through backfill is split at its median. Default: 2048.
    pub segment_capacity: usize,

    /// Maximum number of values a single entry may carry. Default: 32.
    pub max_value_slots: usize,

    /// Maximum tag length in bytes. Default: 255.
    pub max_tag_length: usize,

    /// After a deletion, a segment holding fewer than
    /// `merge_threshold * segment_capacity` entries is merged with a
    /// neighbour when both fit in one segment. Default: 0.25.
    pub merge_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            max_value_slots: DEFAULT_MAX_VALUE_SLOTS,
            max_tag_length: DEFAULT_MAX_TAG_LENGTH,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Sets the segment capacity (at least 2).
    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.segment_capacity = capacity.max(2);
        self
    }

    /// Sets the maximum number of values per entry.
    pub fn with_max_value_slots(mut self, slots: usize) -> Self {
        self.max_value_slots = slots.clamp(1, VALUE_SLOTS_LIMIT);
        self
    }

    /// Sets the maximum tag length in bytes.
    pub fn with_max_tag_length(mut self, len: usize) -> Self {
        self.max_tag_length = len.min(u16::MAX as usize);
        self
    }

    /// Sets the merge threshold, clamped to `0.0..=1.0`.
    pub fn with_merge_threshold(mut self, threshold: f64) -> Self {
        self.merge_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Entry count below which a segment counts as fragmented.
    pub fn merge_floor(&self) -> usize {
        (self.segment_capacity as f64 * self.merge_threshold) as usize
    }
}
