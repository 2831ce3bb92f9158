//! Time-bucketed aggregation and materialized rollups.
//!
//! Buckets are half-open, `[start, start + granularity)`, and aligned to the
//! Unix epoch, so rollups over different ranges line up and can be merged.
//! Every value slot is aggregated on its own.
//!
//! A materialized rollup entry sits at its bucket start and stores, for every
//! raw slot `k`, the six values `first, last, min, max, sum, count` at
//! `6k..6k + 6`. Folding a rollup series merges those states instead of
//! treating them as raw values.

use super::{AppendEntry, EntryFilter, TimeSeriesEngine, ROLLUP_SEPARATOR};
use crate::error::{Result, SeriesError};
use crate::series::{
    align_to_epoch, TimeRange, TimeSeriesEntry, Timestamp, NANOS_PER_MILLI, NANOS_PER_SECOND,
};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const ROLLUP_STATE_WIDTH: usize = 6;

/// Bucket width in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Granularity(i64);

impl Granularity {
    /// Creates a granularity from a positive number of nanoseconds.
    pub fn from_nanos(nanos: i64) -> Result<Self> {
        if nanos <= 0 {
            return Err(SeriesError::InvalidGranularity(format!(
                "width must be positive, got {nanos}ns"
            )));
        }
        Ok(Self(nanos))
    }

    fn scaled(amount: i64, unit: i64) -> Result<Self> {
        let nanos = amount.checked_mul(unit).ok_or_else(|| {
            SeriesError::InvalidGranularity(format!("{amount} units overflow"))
        })?;
        Self::from_nanos(nanos)
    }

    /// `n` milliseconds.
    pub fn milliseconds(n: i64) -> Result<Self> {
        Self::scaled(n, NANOS_PER_MILLI)
    }

    /// `n` seconds.
    pub fn seconds(n: i64) -> Result<Self> {
        Self::scaled(n, NANOS_PER_SECOND)
    }

    /// `n` minutes.
    pub fn minutes(n: i64) -> Result<Self> {
        Self::scaled(n, 60 * NANOS_PER_SECOND)
    }

    /// `n` hours.
    pub fn hours(n: i64) -> Result<Self> {
        Self::scaled(n, 3_600 * NANOS_PER_SECOND)
    }

    /// `n` days.
    pub fn days(n: i64) -> Result<Self> {
        Self::scaled(n, 86_400 * NANOS_PER_SECOND)
    }

    /// `n` weeks.
    pub fn weeks(n: i64) -> Result<Self> {
        Self::scaled(n, 7 * 86_400 * NANOS_PER_SECOND)
    }

    /// Parses a bucket width written as an amount and a unit.
    ///
    /// # Arguments
    ///
    /// * `input` - A positive integer followed by a unit, with or without a
    ///   space: `ms`, `s`, `m`, `h`, `d` or `w`, or their spelled-out forms
    ///   (`"minute"`, `"days"`). Units are case-insensitive.
    ///
    /// # Returns
    ///
    /// The width in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidGranularity` for an unknown unit, a
    /// missing or non-positive amount, or a width past the `i64` range.
    ///
    /// # Example
    ///
    /// ```rust
    /// use alopex_burrow::Granularity;
    ///
    /// let week = Granularity::parse("7 days").unwrap();
    /// assert_eq!(week, Granularity::weeks(1).unwrap());
    /// assert_eq!(Granularity::parse("500ms").unwrap().as_nanos(), 500_000_000);
    /// assert!(Granularity::parse("3 fortnights").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || SeriesError::InvalidGranularity(format!("cannot parse '{input}'"));
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (amount, unit) = trimmed.split_at(split);
        let amount: i64 = amount.parse().map_err(|_| invalid())?;

        match unit.trim().to_ascii_lowercase().as_str() {
            "ms" | "millisecond" | "milliseconds" => Self::milliseconds(amount),
            "s" | "sec" | "second" | "seconds" => Self::seconds(amount),
            "m" | "min" | "minute" | "minutes" => Self::minutes(amount),
            "h" | "hour" | "hours" => Self::hours(amount),
            "d" | "day" | "days" => Self::days(amount),
            "w" | "week" | "weeks" => Self::weeks(amount),
            _ => Err(invalid()),
        }
    }

    /// Width in nanoseconds.
    pub fn as_nanos(self) -> i64 {
        self.0
    }

    /// The half-open bucket `[start, end)` holding `ts`.
    pub fn bucket_of(self, ts: Timestamp) -> (Timestamp, Timestamp) {
        let start = align_to_epoch(ts, self.0);
        (start, start.saturating_add(self.0))
    }
}

impl FromStr for Granularity {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Sum of values.
    Sum,
    /// Number of values.
    Count,
    /// Value of the earliest entry.
    First,
    /// Value of the latest entry.
    Last,
    /// `sum / count`.
    Average,
}

impl Aggregation {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of [`Aggregation`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregationSet(u8);

impl AggregationSet {
    /// The empty set.
    pub fn new() -> Self {
        Self(0)
    }

    /// Every aggregation.
    pub fn all() -> Self {
        [
            Aggregation::Min,
            Aggregation::Max,
            Aggregation::Sum,
            Aggregation::Count,
            Aggregation::First,
            Aggregation::Last,
            Aggregation::Average,
        ]
        .into_iter()
        .collect()
    }

    /// Adds an aggregation.
    pub fn with(mut self, aggregation: Aggregation) -> Self {
        self.0 |= aggregation.bit();
        self
    }

    /// Returns true if the set holds `aggregation`.
    pub fn contains(&self, aggregation: Aggregation) -> bool {
        self.0 & aggregation.bit() != 0
    }
}

impl FromIterator<Aggregation> for AggregationSet {
    fn from_iter<I: IntoIterator<Item = Aggregation>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::with)
    }
}

/// Aggregates of one value slot in one bucket; only requested fields are set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlotAggregate {
    /// Smallest value.
    pub min: Option<f64>,
    /// Largest value.
    pub max: Option<f64>,
    /// Sum of values.
    pub sum: Option<f64>,
    /// Number of values.
    pub count: Option<u64>,
    /// Earliest value.
    pub first: Option<f64>,
    /// Latest value.
    pub last: Option<f64>,
    /// Mean value.
    pub average: Option<f64>,
}

/// Aggregates over one half-open time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Inclusive start.
    pub start: Timestamp,
    /// Exclusive end.
    pub end: Timestamp,
    /// Number of stored entries folded in.
    pub entry_count: u64,
    /// One aggregate per value slot.
    pub slots: Vec<SlotAggregate>,
}

impl Bucket {
    /// Aggregate of value slot `k`.
    pub fn slot(&self, k: usize) -> Option<&SlotAggregate> {
        self.slots.get(k)
    }
}

/// Named rollup target, e.g. `daily` at one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupPolicy {
    /// Policy name.
    pub name: String,
    /// Bucket width.
    pub granularity: Granularity,
}

impl RollupPolicy {
    /// Creates a policy.
    pub fn new(name: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            name: name.into(),
            granularity,
        }
    }

    /// Name of the rollup series fed from `series_name`.
    pub fn series_name(&self, series_name: &str) -> String {
        format!("{series_name}{ROLLUP_SEPARATOR}{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    first: f64,
    last: f64,
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl SlotState {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.first = value;
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.last = value;
        self.sum += value;
        self.count += 1;
    }

    fn merge(&mut self, other: &SlotState) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.last = other.last;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    fn from_stored(values: &[f64]) -> Self {
        match values {
            &[first, last, min, max, sum, count] if count >= 1.0 => Self {
                first,
                last,
                min,
                max,
                sum,
                count: count as u64,
            },
            _ => Self::default(),
        }
    }

    fn to_stored(self) -> [f64; ROLLUP_STATE_WIDTH] {
        [
            self.first,
            self.last,
            self.min,
            self.max,
            self.sum,
            self.count as f64,
        ]
    }

    fn finish(&self, wanted: &AggregationSet) -> SlotAggregate {
        let pick = |aggregation, value| wanted.contains(aggregation).then_some(value);
        let has_values = self.count > 0;
        SlotAggregate {
            min: pick(Aggregation::Min, self.min).filter(|_| has_values),
            max: pick(Aggregation::Max, self.max).filter(|_| has_values),
            sum: pick(Aggregation::Sum, self.sum),
            count: wanted.contains(Aggregation::Count).then_some(self.count),
            first: pick(Aggregation::First, self.first).filter(|_| has_values),
            last: pick(Aggregation::Last, self.last).filter(|_| has_values),
            average: pick(Aggregation::Average, self.sum / self.count as f64)
                .filter(|_| has_values),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    start: Timestamp,
    end: Timestamp,
    entries: u64,
    slots: Vec<SlotState>,
}

impl BucketState {
    fn add(&mut self, entry: &TimeSeriesEntry) {
        self.entries += 1;
        if entry.is_rollup {
            let width = entry.values.len() / ROLLUP_STATE_WIDTH;
            self.grow(width);
            for (k, chunk) in entry.values.chunks_exact(ROLLUP_STATE_WIDTH).enumerate() {
                self.slots[k].merge(&SlotState::from_stored(chunk));
            }
        } else {
            self.grow(entry.values.len());
            for (k, &value) in entry.values.iter().enumerate() {
                self.slots[k].push(value);
            }
        }
    }

    fn grow(&mut self, width: usize) {
        if self.slots.len() < width {
            self.slots.resize(width, SlotState::default());
        }
    }

    fn finish(self, wanted: &AggregationSet) -> Bucket {
        Bucket {
            start: self.start,
            end: self.end,
            entry_count: self.entries,
            slots: self.slots.iter().map(|s| s.finish(wanted)).collect(),
        }
    }
}

/// Folds time-ordered entries into buckets; empty buckets never appear.
fn fold_buckets(
    entries: impl Iterator<Item = Result<TimeSeriesEntry>>,
    granularity: Granularity,
) -> Result<Vec<BucketState>> {
    let mut buckets: Vec<BucketState> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let (start, end) = granularity.bucket_of(entry.timestamp);
        match buckets.last_mut() {
            Some(bucket) if bucket.start == start => bucket.add(&entry),
            _ => {
                let mut bucket = BucketState {
                    start,
                    end,
                    entries: 0,
                    slots: Vec::new(),
                };
                bucket.add(&entry);
                buckets.push(bucket);
            }
        }
    }
    Ok(buckets)
}

impl TimeSeriesEngine {
    /// Aggregates `range` into epoch-aligned buckets of `granularity`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidRange` for an inverted range and
    /// `SeriesError::CorruptSegment` if a segment in range cannot be decoded.
    pub fn rollup(
        &self,
        document_id: &str,
        series_name: &str,
        range: TimeRange,
        granularity: Granularity,
        aggregations: &AggregationSet,
    ) -> Result<Vec<Bucket>> {
        self.rollup_filtered(
            document_id,
            series_name,
            range,
            granularity,
            aggregations,
            &EntryFilter::default(),
        )
    }

    /// Like [`TimeSeriesEngine::rollup`], folding only entries that pass
    /// `filter`.
    pub fn rollup_filtered(
        &self,
        document_id: &str,
        series_name: &str,
        range: TimeRange,
        granularity: Granularity,
        aggregations: &AggregationSet,
        filter: &EntryFilter,
    ) -> Result<Vec<Bucket>> {
        let scan = self.scan(document_id, series_name, range, filter)?;
        Ok(fold_buckets(scan, granularity)?
            .into_iter()
            .map(|bucket| bucket.finish(aggregations))
            .collect())
    }

    /// Folds `range` of a series into its rollup series for `policy`.
    ///
    /// Every bucket touching `range` is recomputed from the raw series and
    /// replaces what the rollup series held for it, so re-running after late
    /// writes or deletions is safe.
    /// Returns the number of buckets written.
    pub fn materialize_rollup(
        &self,
        document_id: &str,
        series_name: &str,
        policy: &RollupPolicy,
        range: TimeRange,
    ) -> Result<usize> {
        SeriesError::check_range(range.from, range.to)?;
        let granularity = policy.granularity;
        let (cleared_from, _) = granularity.bucket_of(range.from);
        let (_, cleared_end) = granularity.bucket_of(range.to);
        let cleared = TimeRange::new(cleared_from, cleared_end.saturating_sub(1).max(range.to));

        // Whole buckets are folded even when the range cuts into them.
        let scan = self.scan(document_id, series_name, cleared, &EntryFilter::default())?;
        let buckets = fold_buckets(scan, granularity)?;

        let entries: Vec<AppendEntry> = buckets
            .iter()
            .map(|bucket| {
                let values: Vec<f64> = bucket.slots.iter().flat_map(|s| s.to_stored()).collect();
                AppendEntry::new(bucket.start, values)
            })
            .collect();

        let target = policy.series_name(series_name);
        let written = entries.len();
        self.write_entries(document_id, &target, true, entries, Some(cleared))?;
        debug!(
            "Materialized {} buckets of {}/{} into {}",
            written, document_id, series_name, target
        );
        Ok(written)
    }
}
