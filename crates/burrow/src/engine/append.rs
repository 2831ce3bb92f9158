//! Append path.
//!
//! New timestamps past the open segment go to its tail. Anything else lands in
//! the segment whose range contains it (or the one preceding the gap it falls
//! into), which is rewritten and split at the median when it outgrows the
//! configured capacity. Equal timestamps overwrite.

use super::{SeriesChange, TimeSeriesEngine, ROLLUP_SEPARATOR};
use crate::config::EngineConfig;
use crate::error::{Result, SeriesError};
use crate::series::compaction::rebuild_segments;
use crate::series::{Entry, SegmentSlot, SeriesIndex, TagTable, TimeRange, Timestamp};
use tracing::debug;

/// One entry of a batch append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendEntry {
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Optional tag.
    pub tag: Option<String>,
    /// Values.
    pub values: Vec<f64>,
}

impl AppendEntry {
    /// Creates an untagged entry.
    pub fn new(timestamp: Timestamp, values: impl Into<Vec<f64>>) -> Self {
        Self {
            timestamp,
            tag: None,
            values: values.into(),
        }
    }

    /// Sets the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl TimeSeriesEngine {
    /// Appends one entry, overwriting any entry at the same timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::DocumentMissing` if the document does not exist,
    /// `SeriesError::SchemaMismatch` if the values or tag exceed the
    /// configured limits or the series holds rollups.
    pub fn append(
        &self,
        document_id: &str,
        series_name: &str,
        timestamp: Timestamp,
        tag: Option<&str>,
        values: &[f64],
    ) -> Result<()> {
        self.append_batch(
            document_id,
            series_name,
            [AppendEntry {
                timestamp,
                tag: tag.map(str::to_string),
                values: values.to_vec(),
            }],
        )
    }

    /// Appends many entries to one series as a single mutation.
    ///
    /// Either every entry is written or none is. Subscribers see one change
    /// and the change vector moves once. Later entries win over earlier ones
    /// with the same timestamp.
    pub fn append_batch(
        &self,
        document_id: &str,
        series_name: &str,
        entries: impl IntoIterator<Item = AppendEntry>,
    ) -> Result<()> {
        if series_name.contains(ROLLUP_SEPARATOR) {
            return Err(SeriesError::SchemaMismatch(format!(
                "'{series_name}' is reserved for rollups"
            )));
        }

        // Every entry passes the limits before anything is interned.
        let entries: Vec<AppendEntry> = entries.into_iter().collect();
        for entry in &entries {
            self.check_limits(entry)?;
        }
        self.write_entries(document_id, series_name, false, entries, None)
    }

    /// Appends values given by field name, using the schema registered for
    /// the document's collection.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::SchemaMismatch` if no schema is registered or a
    /// field is not part of it.
    pub fn append_named(
        &self,
        document_id: &str,
        series_name: &str,
        timestamp: Timestamp,
        tag: Option<&str>,
        fields: &[(&str, f64)],
    ) -> Result<()> {
        let schema = self.schema_for(document_id, series_name)?;
        let values = schema.values_from(fields)?;
        self.append(document_id, series_name, timestamp, tag, &values)
    }

    fn check_limits(&self, entry: &AppendEntry) -> Result<()> {
        let limits = &self.config;
        if entry.values.is_empty() {
            return Err(SeriesError::SchemaMismatch(
                "an entry needs at least one value".to_string(),
            ));
        }
        if entry.values.len() > limits.max_value_slots {
            return Err(SeriesError::SchemaMismatch(format!(
                "{} values exceed the limit of {}",
                entry.values.len(),
                limits.max_value_slots
            )));
        }
        match entry.tag.as_deref() {
            Some(tag) if tag.len() > limits.max_tag_length => Err(SeriesError::SchemaMismatch(
                format!(
                    "tag of {} bytes exceeds the limit of {}",
                    tag.len(),
                    limits.max_tag_length
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Writes checked entries, first clearing `clear` when given.
    ///
    /// Tags are interned only once the document exists and the series kind
    /// matches.
    pub(crate) fn write_entries(
        &self,
        document_id: &str,
        series_name: &str,
        is_rollup: bool,
        entries: Vec<AppendEntry>,
        clear: Option<TimeRange>,
    ) -> Result<()> {
        let create = (!entries.is_empty()).then_some(is_rollup);
        let config = &self.config;
        let tags = self.tags.as_ref();

        self.mutate(document_id, series_name, create, |index, change| {
            if index.is_rollup() != is_rollup {
                return Err(SeriesError::SchemaMismatch(format!(
                    "'{series_name}' holds {} entries",
                    if index.is_rollup() { "rollup" } else { "raw" }
                )));
            }
            if let Some(range) = clear {
                let removed = super::delete::delete_range(index, range, config, tags)?;
                record(self, change, &removed, &[], is_rollup);
            }
            for pending in &entries {
                let tag = pending.tag.as_deref().map(|tag| tags.intern(tag));
                let entry = Entry::new(pending.timestamp, tag, pending.values.clone());
                let replaced: Vec<Entry> = insert_entry(index, entry.clone(), config, tags)?
                    .into_iter()
                    .collect();
                record(self, change, &replaced, std::slice::from_ref(&entry), is_rollup);
            }
            Ok(())
        })?;
        Ok(())
    }
}

fn record(
    engine: &TimeSeriesEngine,
    change: &mut SeriesChange,
    removed: &[Entry],
    added: &[Entry],
    is_rollup: bool,
) {
    change
        .removed
        .extend(removed.iter().map(|e| engine.resolve_entry(e, is_rollup)));
    change
        .added
        .extend(added.iter().map(|e| engine.resolve_entry(e, is_rollup)));
}

/// Inserts one entry into a series index.
///
/// A timestamp past the end of the series is pushed onto the open tail,
/// sealing it first when it is full. Anything else is merged into the segment
/// containing it (or the one before the gap it falls into), which is
/// rewritten and split at the median if it outgrows `config`.
///
/// # Arguments
///
/// * `index` - The writer's private copy of the series index
/// * `entry` - The entry to store; its tag is already interned
/// * `config` - Supplies the segment capacity
/// * `tags` - Used to decode and re-encode rewritten segments
///
/// # Returns
///
/// The entry previously stored at the same timestamp, if any.
///
/// # Errors
///
/// Returns `SeriesError::CorruptSegment` if the target segment cannot be
/// decoded.
pub(crate) fn insert_entry(
    index: &mut SeriesIndex,
    entry: Entry,
    config: &EngineConfig,
    tags: &TagTable,
) -> Result<Option<Entry>> {
    let is_rollup = index.is_rollup();
    let Some(last) = index.slots().last().map(|s| s.descriptor) else {
        index.insert_segment(SegmentSlot::open(vec![entry], is_rollup))?;
        return Ok(None);
    };

    let mut entry = entry;
    if entry.timestamp > last.range.to {
        let tail = index.len() - 1;
        if !last.sealed && last.entry_count < config.segment_capacity {
            if let Some(slot) = index.slot_mut(tail) {
                match slot.push_open(entry) {
                    Ok(()) => return Ok(None),
                    Err(rejected) => entry = rejected,
                }
            }
        }
        if !last.sealed {
            seal_tail(index, tags)?;
        }
        index.insert_segment(SegmentSlot::open(vec![entry], is_rollup))?;
        return Ok(None);
    }

    let target = index
        .locate(entry.timestamp)
        .or_else(|| index.preceding(entry.timestamp))
        .unwrap_or(0);
    let slot = &index.slots()[target];
    let open_tail = !slot.descriptor.sealed;
    let mut entries = slot.entries(tags)?;

    let replaced = match entries.binary_search_by_key(&entry.timestamp, |e| e.timestamp) {
        Ok(pos) => Some(std::mem::replace(&mut entries[pos], entry)),
        Err(pos) => {
            entries.insert(pos, entry);
            None
        }
    };

    let rebuilt = rebuild_segments(entries, is_rollup, open_tail, config, tags)?;
    index.replace(target..target + 1, rebuilt)?;
    Ok(replaced)
}

fn seal_tail(index: &mut SeriesIndex, tags: &TagTable) -> Result<()> {
    let tail = index.len() - 1;
    let slot = &index.slots()[tail];
    let sealed = SegmentSlot::sealed(&slot.entries(tags)?, index.is_rollup(), tags)?;
    debug!(
        "Sealed segment [{}, {}] with {} entries",
        sealed.descriptor.range.from, sealed.descriptor.range.to, sealed.descriptor.entry_count
    );
    index.replace(tail..tail + 1, vec![sealed])
}
