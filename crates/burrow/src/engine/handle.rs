//! Narrow mutation surface for script-driven callers.

use super::{GetRequest, TimeSeriesEngine};
use crate::error::Result;
use crate::series::{TimeRange, TimeSeriesEntry, Timestamp};

/// The three primitives a patch script may call on a series.
///
/// Scripting collaborators hold a `&dyn TimeSeriesMutationHandle` and never
/// see the rest of the engine.
pub trait TimeSeriesMutationHandle {
    /// Appends one entry, overwriting any entry at the same timestamp.
    fn append(
        &self,
        document_id: &str,
        series_name: &str,
        timestamp: Timestamp,
        tag: Option<&str>,
        values: &[f64],
    ) -> Result<()>;

    /// Deletes the entries in `[from, to]`.
    fn delete(&self, document_id: &str, series_name: &str, from: Timestamp, to: Timestamp)
        -> Result<()>;

    /// Reads entries in `[from, to]`, both defaulting to unbounded, skipping
    /// `start` and returning at most `page_size`.
    fn get(
        &self,
        document_id: &str,
        series_name: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        start: usize,
        page_size: usize,
    ) -> Result<Vec<TimeSeriesEntry>>;
}

impl TimeSeriesMutationHandle for TimeSeriesEngine {
    fn append(
        &self,
        document_id: &str,
        series_name: &str,
        timestamp: Timestamp,
        tag: Option<&str>,
        values: &[f64],
    ) -> Result<()> {
        TimeSeriesEngine::append(self, document_id, series_name, timestamp, tag, values)
    }

    fn delete(
        &self,
        document_id: &str,
        series_name: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<()> {
        TimeSeriesEngine::delete(self, document_id, series_name, TimeRange::new(from, to))
    }

    fn get(
        &self,
        document_id: &str,
        series_name: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        start: usize,
        page_size: usize,
    ) -> Result<Vec<TimeSeriesEntry>> {
        let request = GetRequest::new()
            .between(from.unwrap_or(Timestamp::MIN), to.unwrap_or(Timestamp::MAX))
            .page(start, page_size);
        Ok(TimeSeriesEngine::get(self, document_id, series_name, &request)?.entries)
    }
}
