//! Range queries.
//!
//! A query clones the series index once and then walks the intersecting
//! segments lazily through [`RangeScan`]: segments are decoded one at a time
//! as the scan reaches them, and filters run while streaming.

use super::TimeSeriesEngine;
use crate::error::{Result, SeriesError};
use crate::series::{
    Entry, FromNamedValues, NamedValues, SegmentData, SegmentSlot, SeriesIndex, TagId, TagTable,
    TailView, TimeRange, TimeSeriesEntry, Timestamp,
};
use std::sync::Arc;

/// Comparison operator of a [`ValuePredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
}

impl Comparison {
    /// Applies the operator.
    pub fn eval(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Equal => lhs == rhs,
            Comparison::NotEqual => lhs != rhs,
            Comparison::Less => lhs < rhs,
            Comparison::LessOrEqual => lhs <= rhs,
            Comparison::Greater => lhs > rhs,
            Comparison::GreaterOrEqual => lhs >= rhs,
        }
    }
}

/// Tag condition of an [`EntryFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPredicate {
    /// The entry carries exactly this tag.
    Equals(String),
    /// The entry carries no tag.
    Untagged,
}

/// Condition on one value slot, e.g. `values[4] > 500000`.
///
/// Entries without the slot never match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePredicate {
    /// Slot to test.
    pub slot: usize,
    /// Operator.
    pub comparison: Comparison,
    /// Right-hand side.
    pub threshold: f64,
}

/// Optional tag and value conditions applied while scanning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    /// Tag condition.
    pub tag: Option<TagPredicate>,
    /// Value condition.
    pub value: Option<ValuePredicate>,
}

impl EntryFilter {
    /// A filter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the given tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(TagPredicate::Equals(tag.into()));
        self
    }

    /// Requires entries without a tag.
    pub fn untagged(mut self) -> Self {
        self.tag = Some(TagPredicate::Untagged);
        self
    }

    /// Requires `values[slot] <comparison> threshold`.
    pub fn with_value(mut self, slot: usize, comparison: Comparison, threshold: f64) -> Self {
        self.value = Some(ValuePredicate {
            slot,
            comparison,
            threshold,
        });
        self
    }

    fn compile(&self, tags: &TagTable) -> CompiledFilter {
        let tag = match &self.tag {
            None => TagMatch::Any,
            Some(TagPredicate::Untagged) => TagMatch::Is(None),
            Some(TagPredicate::Equals(name)) => match tags.lookup(name) {
                Some(id) => TagMatch::Is(Some(id)),
                None => TagMatch::Nothing,
            },
        };
        CompiledFilter {
            tag,
            value: self.value,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TagMatch {
    Any,
    Is(Option<TagId>),
    Nothing,
}

#[derive(Debug, Clone, Copy)]
struct CompiledFilter {
    tag: TagMatch,
    value: Option<ValuePredicate>,
}

impl CompiledFilter {
    fn matches(&self, entry: &Entry) -> bool {
        let tag_ok = match self.tag {
            TagMatch::Any => true,
            TagMatch::Is(tag) => entry.tag == tag,
            TagMatch::Nothing => false,
        };
        tag_ok
            && self.value.map_or(true, |p| {
                entry
                    .values
                    .get(p.slot)
                    .is_some_and(|&v| p.comparison.eval(v, p.threshold))
            })
    }
}

/// Parameters of [`TimeSeriesEngine::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetRequest {
    /// Inclusive range; defaults to everything.
    pub range: TimeRange,
    /// Matching entries to skip.
    pub start: usize,
    /// Maximum entries to return.
    pub page_size: usize,
    /// Tag and value conditions.
    pub filter: EntryFilter,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            range: TimeRange::all(),
            start: 0,
            page_size: usize::MAX,
            filter: EntryFilter::default(),
        }
    }
}

impl GetRequest {
    /// Requests the whole series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the request to `[from, to]`.
    pub fn between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.range = TimeRange::new(from, to);
        self
    }

    /// Sets the paging window.
    pub fn page(mut self, start: usize, page_size: usize) -> Self {
        self.start = start;
        self.page_size = page_size;
        self
    }

    /// Sets the filter.
    pub fn filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesPage {
    /// Entries in ascending timestamp order.
    pub entries: Vec<TimeSeriesEntry>,
    /// Entry count of every segment intersecting the range, before range
    /// trimming and filtering. An upper bound on the matches.
    pub total_hint: usize,
}

/// An entry projected through a value schema.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedEntry {
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Tag string, if any.
    pub tag: Option<Arc<str>>,
    /// Values by field name.
    pub values: NamedValues,
}

/// An entry converted into a caller-defined record.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEntry<T> {
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Tag string, if any.
    pub tag: Option<Arc<str>>,
    /// The record.
    pub value: T,
}

enum Cursor {
    Tail(TailView),
    Decoded(Vec<Entry>),
}

impl Cursor {
    fn read<R>(&self, f: impl FnOnce(&[Entry]) -> R) -> R {
        match self {
            Cursor::Tail(view) => view.read(f),
            Cursor::Decoded(entries) => f(entries),
        }
    }
}

enum Step {
    Matched(TimeSeriesEntry),
    PastRange,
    Exhausted,
}

/// Lazy scan over the entries of a series snapshot.
///
/// Yields `Err` once for every segment that fails to decode and then moves
/// on, so callers decide whether a damaged segment aborts the read.
pub struct RangeScan {
    tags: Arc<TagTable>,
    slots: std::vec::IntoIter<SegmentSlot>,
    range: TimeRange,
    filter: CompiledFilter,
    is_rollup: bool,
    total_hint: usize,
    current: Option<(Cursor, usize)>,
    done: bool,
}

impl RangeScan {
    fn new(tags: Arc<TagTable>, index: Option<&SeriesIndex>, range: TimeRange, filter: &EntryFilter) -> Self {
        let slots: Vec<SegmentSlot> = index
            .map(|index| index.range_segments(range).to_vec())
            .unwrap_or_default();
        let filter = filter.compile(&tags);
        Self {
            total_hint: slots.iter().map(|s| s.descriptor.entry_count).sum(),
            is_rollup: index.is_some_and(SeriesIndex::is_rollup),
            tags,
            slots: slots.into_iter(),
            range,
            filter,
            current: None,
            done: false,
        }
    }

    /// Entry count of the segments the scan will visit.
    pub fn total_hint(&self) -> usize {
        self.total_hint
    }
}

impl Iterator for RangeScan {
    type Item = Result<TimeSeriesEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some((cursor, pos)) = self.current.as_mut() {
                let (range, filter, tags, is_rollup) = (self.range, &self.filter, &self.tags, self.is_rollup);
                let step = cursor.read(|entries| {
                    while let Some(entry) = entries.get(*pos) {
                        *pos += 1;
                        if entry.timestamp > range.to {
                            return Step::PastRange;
                        }
                        if filter.matches(entry) {
                            return Step::Matched(TimeSeriesEntry::resolve(entry, tags, is_rollup));
                        }
                    }
                    Step::Exhausted
                });
                match step {
                    Step::Matched(entry) => return Some(Ok(entry)),
                    Step::PastRange => self.done = true,
                    Step::Exhausted => {}
                }
                self.current = None;
                continue;
            }

            let slot = self.slots.next()?;
            let cursor = match slot.data {
                SegmentData::Open(view) => Cursor::Tail(view),
                sealed @ SegmentData::Sealed(_) => match sealed.entries(&self.tags) {
                    Ok(entries) => Cursor::Decoded(entries),
                    Err(err) => return Some(Err(err)),
                },
            };
            let pos = cursor.read(|entries| entries.partition_point(|e| e.timestamp < self.range.from));
            self.current = Some((cursor, pos));
        }
    }
}

impl TimeSeriesEngine {
    /// Starts a lazy scan of `range`.
    ///
    /// A missing series yields an empty scan.
    pub fn scan(
        &self,
        document_id: &str,
        series_name: &str,
        range: TimeRange,
        filter: &EntryFilter,
    ) -> Result<RangeScan> {
        SeriesError::check_range(range.from, range.to)?;
        self.ensure_document(document_id)?;
        let snapshot = self.snapshot(document_id, series_name);
        Ok(RangeScan::new(
            Arc::clone(&self.tags),
            snapshot.as_deref(),
            range,
            filter,
        ))
    }

    /// Returns one page of entries.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidRange` for an inverted range and
    /// `SeriesError::CorruptSegment` if a segment inside the range cannot be
    /// decoded.
    pub fn get(
        &self,
        document_id: &str,
        series_name: &str,
        request: &GetRequest,
    ) -> Result<TimeSeriesPage> {
        let scan = self.scan(document_id, series_name, request.range, &request.filter)?;
        collect_page(scan, request.start, request.page_size)
    }

    /// Returns one page per range, all read from the same snapshot.
    pub fn get_ranges(
        &self,
        document_id: &str,
        series_name: &str,
        ranges: &[TimeRange],
    ) -> Result<Vec<TimeSeriesPage>> {
        for range in ranges {
            SeriesError::check_range(range.from, range.to)?;
        }
        self.ensure_document(document_id)?;
        let snapshot = self.snapshot(document_id, series_name);
        let filter = EntryFilter::default();

        ranges
            .iter()
            .map(|&range| {
                let scan = RangeScan::new(Arc::clone(&self.tags), snapshot.as_deref(), range, &filter);
                collect_page(scan, 0, usize::MAX)
            })
            .collect()
    }

    /// Returns one page projected through the schema registered for the
    /// document's collection.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::SchemaMismatch` if no schema is registered.
    pub fn get_named(
        &self,
        document_id: &str,
        series_name: &str,
        request: &GetRequest,
    ) -> Result<Vec<NamedEntry>> {
        let schema = self.schema_for(document_id, series_name)?;
        let page = self.get(document_id, series_name, request)?;
        Ok(page
            .entries
            .into_iter()
            .map(|entry| NamedEntry {
                timestamp: entry.timestamp,
                values: schema.project(&entry.values),
                tag: entry.tag,
            })
            .collect())
    }

    /// Like [`TimeSeriesEngine::get_named`], converting each entry into `T`.
    pub fn get_as<T: FromNamedValues>(
        &self,
        document_id: &str,
        series_name: &str,
        request: &GetRequest,
    ) -> Result<Vec<TypedEntry<T>>> {
        Ok(self
            .get_named(document_id, series_name, request)?
            .into_iter()
            .map(|entry| TypedEntry {
                timestamp: entry.timestamp,
                value: T::from_named(&entry.values),
                tag: entry.tag,
            })
            .collect())
    }
}

// Errors inside the skipped prefix still fail the page.
fn collect_page(mut scan: RangeScan, start: usize, page_size: usize) -> Result<TimeSeriesPage> {
    let total_hint = scan.total_hint();
    let mut entries = Vec::new();
    let mut skipped = 0;
    while entries.len() < page_size {
        let Some(entry) = scan.next() else {
            break;
        };
        let entry = entry?;
        if skipped < start {
            skipped += 1;
            continue;
        }
        entries.push(entry);
    }
    Ok(TimeSeriesPage {
        entries,
        total_hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_eval() {
        assert!(Comparison::Greater.eval(600_000.0, 500_000.0));
        assert!(!Comparison::Greater.eval(500_000.0, 500_000.0));
        assert!(Comparison::GreaterOrEqual.eval(500_000.0, 500_000.0));
        assert!(Comparison::NotEqual.eval(1.0, 2.0));
        assert!(!Comparison::Equal.eval(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_compiled_filter() {
        let tags = TagTable::new();
        let fitbit = tags.intern("watches/fitbit");
        let entry = Entry::new(1, Some(fitbit), vec![70.0, 0.5]);

        let by_tag = EntryFilter::new().with_tag("watches/fitbit").compile(&tags);
        assert!(by_tag.matches(&entry));

        let unknown = EntryFilter::new().with_tag("watches/unknown").compile(&tags);
        assert!(!unknown.matches(&entry));

        let untagged = EntryFilter::new().untagged().compile(&tags);
        assert!(!untagged.matches(&entry));

        let by_value = EntryFilter::new()
            .with_value(0, Comparison::Greater, 65.0)
            .compile(&tags);
        assert!(by_value.matches(&entry));

        let missing_slot = EntryFilter::new()
            .with_value(7, Comparison::Less, 1e9)
            .compile(&tags);
        assert!(!missing_slot.matches(&entry));
    }

    #[test]
    fn test_scan_trims_to_range() {
        let tags = Arc::new(TagTable::new());
        let mut index = SeriesIndex::new(false);
        let entries: Vec<Entry> = (0..10).map(|ts| Entry::new(ts, None, vec![ts as f64])).collect();
        index
            .insert_segment(SegmentSlot::sealed(&entries, false, &tags).unwrap())
            .unwrap();

        let scan = RangeScan::new(tags, Some(&index), TimeRange::new(3, 6), &EntryFilter::new());
        assert_eq!(scan.total_hint(), 10);
        let timestamps: Vec<i64> = scan.map(|e| e.unwrap().timestamp).collect();
        assert_eq!(timestamps, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_corrupt_segment_in_skipped_prefix_fails_page() {
        let tags = Arc::new(TagTable::new());
        let first: Vec<Entry> = (0..4).map(|ts| Entry::new(ts, None, vec![1.0])).collect();
        let second: Vec<Entry> = (10..14).map(|ts| Entry::new(ts, None, vec![1.0])).collect();

        let mut blob = crate::series::encode_segment(&first, false, &tags).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        let mut index = SeriesIndex::new(false);
        index.insert_segment(SegmentSlot::from_blob(blob).unwrap()).unwrap();
        index.insert_segment(SegmentSlot::open(second, false)).unwrap();

        let scan = RangeScan::new(Arc::clone(&tags), Some(&index), TimeRange::all(), &EntryFilter::new());
        assert!(matches!(
            collect_page(scan, 5, 2),
            Err(SeriesError::CorruptSegment { start: 0, .. })
        ));

        let tail = RangeScan::new(tags, Some(&index), TimeRange::new(10, 20), &EntryFilter::new());
        assert_eq!(collect_page(tail, 1, 2).unwrap().entries.len(), 2);
    }
}
