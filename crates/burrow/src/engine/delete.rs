//! Delete path.

use super::TimeSeriesEngine;
use crate::config::EngineConfig;
use crate::error::{Result, SeriesError};
use crate::series::compaction::merge_fragments;
use crate::series::{Entry, SegmentSlot, SeriesIndex, TagTable, TimeRange, Timestamp};
use tracing::warn;

impl TimeSeriesEngine {
    /// Deletes every entry in the inclusive `range`.
    ///
    /// Deleting a range that holds nothing, or a series that does not exist,
    /// succeeds without effect. Removing the last entry removes the series.
    /// Subscribers see at most one change per call.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidRange` if `range.from > range.to`,
    /// `SeriesError::DocumentMissing` if the document does not exist, and
    /// `SeriesError::CorruptSegment` if a partly covered segment cannot be
    /// decoded.
    pub fn delete(&self, document_id: &str, series_name: &str, range: TimeRange) -> Result<()> {
        SeriesError::check_range(range.from, range.to)?;
        let config = &self.config;
        let tags = self.tags.as_ref();

        self.mutate(document_id, series_name, None, |index, change| {
            let is_rollup = index.is_rollup();
            let removed = delete_range(index, range, config, tags)?;
            change
                .removed
                .extend(removed.iter().map(|e| self.resolve_entry(e, is_rollup)));
            Ok(())
        })?;
        Ok(())
    }

    /// Deletes the entry at `timestamp`, if any.
    pub fn delete_at(&self, document_id: &str, series_name: &str, timestamp: Timestamp) -> Result<()> {
        self.delete(document_id, series_name, TimeRange::at(timestamp))
    }
}

/// Removes the entries in `range` from `index` and returns them in time order.
///
/// A segment wholly inside the range is dropped even if it cannot be decoded;
/// its entries are then missing from the result.
pub(crate) fn delete_range(
    index: &mut SeriesIndex,
    range: TimeRange,
    config: &EngineConfig,
    tags: &TagTable,
) -> Result<Vec<Entry>> {
    let is_rollup = index.is_rollup();
    let mut removed: Vec<Vec<Entry>> = Vec::new();
    let mut touched = false;

    for idx in index.range_bounds(range).rev() {
        let descriptor = index.slots()[idx].descriptor;
        let entries = match index.slots()[idx].entries(tags) {
            Ok(entries) => entries,
            Err(err) if range.covers(&descriptor.range) => {
                warn!(
                    "Dropping unreadable segment [{}, {}]: {}",
                    descriptor.range.from, descriptor.range.to, err
                );
                index.remove_segment(idx);
                touched = true;
                continue;
            }
            Err(err) => return Err(err),
        };

        let (gone, kept): (Vec<Entry>, Vec<Entry>) = entries
            .into_iter()
            .partition(|e| range.contains(e.timestamp));
        if gone.is_empty() {
            continue;
        }
        touched = true;

        if kept.is_empty() {
            index.remove_segment(idx);
        } else {
            let slot = SegmentSlot::with_state(kept, is_rollup, descriptor.sealed, tags)?;
            index.replace(idx..idx + 1, vec![slot])?;
        }
        removed.push(gone);
    }

    if touched && !index.is_empty() {
        merge_fragments(index, config, tags)?;
    }
    Ok(removed.into_iter().rev().flatten().collect())
}
