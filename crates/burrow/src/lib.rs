//! Burrow - Alopex Document Time Series Engine
//!
//! This crate stores time series attached to documents: per `(document,
//! series name)`, an ordered history of timestamped, optionally tagged,
//! multi-value entries.
//!
//! # Components
//!
//! - [`TimeSeriesEngine`]: append, delete, range queries, and rollups
//! - [`SeriesIndex`]: ordered, non-overlapping segments of one series
//! - [`SegmentData`]: open or sealed (Gorilla-compressed) segment contents
//! - [`TagTable`]: append-only intern table for entry tags
//! - [`SchemaRegistry`]: named value layouts for typed access
//!
//! # Example
//!
//! ```rust
//! use alopex_burrow::{
//!     AggregationSet, Aggregation, EngineConfig, GetRequest, Granularity,
//!     InMemoryDocumentStore, TimeRange, TimeSeriesEngine,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! store.insert("users/ayende", "Users");
//! let engine = TimeSeriesEngine::new(store, EngineConfig::default());
//!
//! let hour = 3_600_000_000_000;
//! engine.append("users/ayende", "Heartrate", 0, Some("watches/fitbit"), &[59.0])?;
//! engine.append("users/ayende", "Heartrate", hour, Some("watches/fitbit"), &[64.0])?;
//!
//! let page = engine.get("users/ayende", "Heartrate", &GetRequest::new())?;
//! assert_eq!(page.entries.len(), 2);
//!
//! let aggregations: AggregationSet = [Aggregation::Max].into_iter().collect();
//! let buckets = engine.rollup(
//!     "users/ayende",
//!     "Heartrate",
//!     TimeRange::all(),
//!     Granularity::parse("1 day")?,
//!     &aggregations,
//! )?;
//! assert_eq!(buckets[0].slots[0].max, Some(64.0));
//! # Ok::<(), alopex_burrow::SeriesError>(())
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod series;

pub use config::EngineConfig;
pub use engine::{
    Aggregation, AggregationSet, AppendEntry, Bucket, ChangeSubscriber, Comparison,
    DocumentStore, EntryFilter, GetRequest, Granularity, InMemoryDocumentStore, NamedEntry,
    RangeScan, RollupPolicy, SeriesChange, SeriesStats, SlotAggregate, TagPredicate,
    TimeSeriesEngine, TimeSeriesMutationHandle, TimeSeriesPage, TypedEntry, ValuePredicate,
};
pub use error::{Result, SeriesError};
pub use series::{
    FromNamedValues, NamedValues, SchemaRegistry, SchemaRegistryBuilder, SegmentData,
    SeriesIndex, TagId, TagTable, TimeRange, TimeSeriesEntry, Timestamp, ValueSchema,
};
