//! The time series engine.
//!
//! [`TimeSeriesEngine`] owns every series of every document. Each series sits
//! in its own cell: mutations of one series are serialized by the cell's
//! write gate, mutations of different series run independently.
//!
//! Writers never change what the published index shows. They clone it
//! (segment contents are shared, so this copies descriptors only), apply the
//! whole operation to the clone, and swap it in on success. Tail appends write
//! into the open segment's shared buffer past the published length, where no
//! reader looks. A failed operation drops the clone, leaving the series
//! exactly as it was. Readers clone the published `Arc` and scan it without
//! holding the series lock.

mod append;
pub mod bridge;
mod delete;
mod handle;
mod query;
mod rollup;

pub use append::AppendEntry;
pub use bridge::{ChangeSubscriber, DocumentStore, InMemoryDocumentStore, SeriesChange};
pub use handle::TimeSeriesMutationHandle;
pub use query::{
    Comparison, EntryFilter, GetRequest, NamedEntry, RangeScan, TagPredicate, TimeSeriesPage,
    TypedEntry, ValuePredicate,
};
pub use rollup::{Aggregation, AggregationSet, Bucket, Granularity, RollupPolicy, SlotAggregate};

use crate::config::EngineConfig;
use crate::error::{Result, SeriesError};
use crate::series::{
    Entry, SchemaRegistry, SegmentSlot, SeriesIndex, TagTable, TimeSeriesEntry, Timestamp,
    ValueSchema,
};
use bridge::ChangeBridge;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// Separates a raw series name from a rollup policy name, as in
/// `"Heartrate@daily"`.
pub const ROLLUP_SEPARATOR: char = '@';

struct SeriesCell {
    gate: Mutex<()>,
    index: RwLock<Arc<SeriesIndex>>,
    removed: AtomicBool,
}

impl SeriesCell {
    fn new(is_rollup: bool) -> Self {
        Self {
            gate: Mutex::new(()),
            index: RwLock::new(Arc::new(SeriesIndex::new(is_rollup))),
            removed: AtomicBool::new(false),
        }
    }

    fn load(&self) -> Arc<SeriesIndex> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn store(&self, index: SeriesIndex) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
    }
}

type DocumentSeries = BTreeMap<String, Arc<SeriesCell>>;

/// Summary of one series, as returned by [`TimeSeriesEngine::series_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesStats {
    /// Series name.
    pub name: String,
    /// Timestamp of the first entry.
    pub first: Timestamp,
    /// Timestamp of the last entry.
    pub last: Timestamp,
    /// Number of entries.
    pub entry_count: usize,
    /// Number of segments.
    pub segment_count: usize,
    /// True for materialized rollup series.
    pub is_rollup: bool,
}

/// Per-document time series storage and query engine.
pub struct TimeSeriesEngine {
    config: EngineConfig,
    schemas: SchemaRegistry,
    tags: Arc<TagTable>,
    bridge: ChangeBridge,
    documents: RwLock<HashMap<String, DocumentSeries>>,
}

impl TimeSeriesEngine {
    /// Creates an engine backed by `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self {
            config,
            schemas: SchemaRegistry::default(),
            tags: Arc::new(TagTable::new()),
            bridge: ChangeBridge::new(store),
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the value schemas used by named appends and typed reads.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Adds a subscriber notified after every committed mutation.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn ChangeSubscriber>) -> Self {
        self.bridge.subscribe(subscriber);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared tag table.
    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// Registered value schemas.
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Names of the series of a document, in byte order.
    pub fn list_series_names(&self, document_id: &str) -> Vec<String> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(document_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|(_, cell)| !cell.load().is_empty())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Statistics of every series of a document.
    pub fn series_stats(&self, document_id: &str) -> Result<Vec<SeriesStats>> {
        self.ensure_document(document_id)?;
        let cells: Vec<(String, Arc<SeriesCell>)> = {
            let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
            documents
                .get(document_id)
                .map(|series| {
                    series
                        .iter()
                        .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(cells
            .into_iter()
            .filter_map(|(name, cell)| {
                let index = cell.load();
                let span = index.span()?;
                Some(SeriesStats {
                    name,
                    first: span.from,
                    last: span.to,
                    entry_count: index.entry_count(),
                    segment_count: index.len(),
                    is_rollup: index.is_rollup(),
                })
            })
            .collect())
    }

    /// Drops every series of a document. Returns how many were dropped.
    ///
    /// Intended for the document store's delete path, so the document itself
    /// may already be gone.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
            .unwrap_or_default();

        let count = removed.len();
        for (name, cell) in removed {
            let _gate = cell.gate.lock().unwrap_or_else(PoisonError::into_inner);
            cell.removed.store(true, Ordering::Release);
            let mut change = SeriesChange::new(document_id, &name);
            change.reset = true;
            self.bridge.publish(&change);
        }
        if count > 0 {
            debug!("Removed {} series of document {}", count, document_id);
        }
        count
    }

    /// Returns the persisted form of every segment of a series.
    ///
    /// The open segment is encoded on the fly; sealed segments are returned
    /// as stored.
    pub fn export_series(&self, document_id: &str, series_name: &str) -> Result<Vec<Vec<u8>>> {
        self.ensure_document(document_id)?;
        let Some(index) = self.snapshot(document_id, series_name) else {
            return Ok(Vec::new());
        };
        index
            .slots()
            .iter()
            .map(|slot| slot.to_blob(&self.tags))
            .collect()
    }

    /// Replaces a series with persisted segments.
    ///
    /// Headers are validated here; bodies are validated when first read, so a
    /// damaged body only fails reads of its own segment.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::CorruptSegment` for an invalid header,
    /// `SeriesError::OverlapViolation` if two segments overlap, and
    /// `SeriesError::SchemaMismatch` if raw and rollup segments are mixed.
    pub fn import_series(
        &self,
        document_id: &str,
        series_name: &str,
        blobs: Vec<Vec<u8>>,
    ) -> Result<()> {
        let slots = blobs
            .into_iter()
            .map(SegmentSlot::from_blob)
            .collect::<Result<Vec<_>>>()?;
        let is_rollup = slots.first().is_some_and(|s| s.descriptor.is_rollup);
        if slots.iter().any(|s| s.descriptor.is_rollup != is_rollup) {
            return Err(SeriesError::SchemaMismatch(
                "cannot mix raw and rollup segments in one series".to_string(),
            ));
        }
        let mut imported = SeriesIndex::new(is_rollup);
        for slot in slots {
            imported.insert_segment(slot)?;
        }
        let segments = imported.len();

        let mut imported = Some(imported);
        self.mutate(document_id, series_name, Some(is_rollup), |index, change| {
            if let Some(imported) = imported.take() {
                *index = imported;
            }
            change.reset = true;
            Ok(())
        })?;
        debug!(
            "Imported {} segments into {}/{}",
            segments, document_id, series_name
        );
        Ok(())
    }

    pub(crate) fn ensure_document(&self, document_id: &str) -> Result<()> {
        if !self.bridge.store().document_exists(document_id) {
            return Err(SeriesError::DocumentMissing(document_id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn schema_for(&self, document_id: &str, series_name: &str) -> Result<Arc<ValueSchema>> {
        let collection = self
            .bridge
            .store()
            .collection_of(document_id)
            .ok_or_else(|| SeriesError::DocumentMissing(document_id.to_string()))?;
        self.schemas
            .resolve(&collection, series_name)
            .ok_or_else(|| {
                SeriesError::SchemaMismatch(format!(
                    "no schema registered for {collection}/{series_name}"
                ))
            })
    }

    pub(crate) fn snapshot(&self, document_id: &str, series_name: &str) -> Option<Arc<SeriesIndex>> {
        self.cell(document_id, series_name)
            .map(|cell| cell.load())
            .filter(|index| !index.is_empty())
    }

    pub(crate) fn resolve_entry(&self, entry: &Entry, is_rollup: bool) -> TimeSeriesEntry {
        TimeSeriesEntry::resolve(entry, &self.tags, is_rollup)
    }

    fn cell(&self, document_id: &str, series_name: &str) -> Option<Arc<SeriesCell>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(document_id)
            .and_then(|series| series.get(series_name))
            .cloned()
    }

    fn create_cell(&self, document_id: &str, series_name: &str, is_rollup: bool) -> Arc<SeriesCell> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let series = documents.entry(document_id.to_string()).or_default();
        Arc::clone(series.entry(series_name.to_string()).or_insert_with(|| {
            debug!("Created series {}/{}", document_id, series_name);
            Arc::new(SeriesCell::new(is_rollup))
        }))
    }

    fn drop_cell(&self, document_id: &str, series_name: &str, cell: &Arc<SeriesCell>) {
        cell.removed.store(true, Ordering::Release);
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(series) = documents.get_mut(document_id) {
            if series
                .get(series_name)
                .is_some_and(|current| Arc::ptr_eq(current, cell))
            {
                series.remove(series_name);
                debug!("Removed empty series {}/{}", document_id, series_name);
            }
            if series.is_empty() {
                documents.remove(document_id);
            }
        }
    }

    /// Runs one mutation against a private copy of a series index and
    /// publishes it on success.
    ///
    /// `create` carries the rollup flag of a series to create when it does not
    /// exist; with `None` a missing series makes this a no-op returning
    /// `Ok(None)`.
    pub(crate) fn mutate<T, F>(
        &self,
        document_id: &str,
        series_name: &str,
        create: Option<bool>,
        mut apply: F,
    ) -> Result<Option<T>>
    where
        F: FnMut(&mut SeriesIndex, &mut SeriesChange) -> Result<T>,
    {
        self.ensure_document(document_id)?;

        loop {
            let cell = match (self.cell(document_id, series_name), create) {
                (Some(cell), _) => cell,
                (None, Some(is_rollup)) => self.create_cell(document_id, series_name, is_rollup),
                (None, None) => return Ok(None),
            };

            let _gate = cell.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if cell.removed.load(Ordering::Acquire) {
                continue;
            }

            let current = cell.load();
            let mut working = SeriesIndex::clone(&current);
            let mut change = SeriesChange::new(document_id, series_name);

            let output = match apply(&mut working, &mut change) {
                Ok(output) => output,
                Err(err) => {
                    if current.is_empty() {
                        self.drop_cell(document_id, series_name, &cell);
                    }
                    return Err(err);
                }
            };

            if working.is_empty() {
                self.drop_cell(document_id, series_name, &cell);
            } else {
                cell.store(working);
            }
            self.bridge.publish(&change);
            return Ok(Some(output));
        }
    }
}
