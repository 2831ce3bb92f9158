//! Integration tests for bucket aggregation and materialized rollups.

use alopex_burrow::{
    Aggregation, AggregationSet, EngineConfig, EntryFilter, GetRequest, Granularity,
    InMemoryDocumentStore, RollupPolicy, SeriesError, TimeRange, TimeSeriesEngine,
};
use std::sync::Arc;

const DOC: &str = "users/ayende";
const SERIES: &str = "Heartrate";
const HOUR: i64 = 3_600_000_000_000;

fn engine() -> TimeSeriesEngine {
    let store = Arc::new(InMemoryDocumentStore::new());
    store.insert(DOC, "Users");
    TimeSeriesEngine::new(store, EngineConfig::default().with_segment_capacity(8))
}

fn daily() -> RollupPolicy {
    RollupPolicy::new("daily", Granularity::days(1).unwrap())
}

// ============================================================================
// Ad-hoc Rollups
// ============================================================================

#[test]
fn test_daily_buckets() {
    let engine = engine();
    engine.append(DOC, SERIES, 0, None, &[1.0]).unwrap();
    engine.append(DOC, SERIES, HOUR, None, &[3.0]).unwrap();
    engine.append(DOC, SERIES, 26 * HOUR, None, &[5.0]).unwrap();

    let aggregations = AggregationSet::new()
        .with(Aggregation::Min)
        .with(Aggregation::Max)
        .with(Aggregation::Count);
    let buckets = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::days(1).unwrap(), &aggregations)
        .unwrap();

    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].start, 0);
    assert_eq!(buckets[0].end, 24 * HOUR);
    assert_eq!(buckets[0].slots[0].min, Some(1.0));
    assert_eq!(buckets[0].slots[0].max, Some(3.0));
    assert_eq!(buckets[0].slots[0].count, Some(2));
    assert_eq!(buckets[0].slots[0].sum, None);
    assert_eq!(buckets[1].start, 24 * HOUR);
    assert_eq!(buckets[1].slots[0].min, Some(5.0));
    assert_eq!(buckets[1].slots[0].max, Some(5.0));
    assert_eq!(buckets[1].slots[0].count, Some(1));
}

#[test]
fn test_first_last_average() {
    let engine = engine();
    for (i, v) in [4.0, 8.0, 6.0, 2.0].iter().enumerate() {
        engine.append(DOC, SERIES, i as i64 * HOUR, None, &[*v]).unwrap();
    }

    let buckets = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::days(1).unwrap(), &AggregationSet::all())
        .unwrap();
    let slot = buckets[0].slot(0).unwrap();

    assert_eq!(slot.first, Some(4.0));
    assert_eq!(slot.last, Some(2.0));
    assert_eq!(slot.sum, Some(20.0));
    assert_eq!(slot.average, Some(5.0));
}

#[test]
fn test_empty_buckets_are_omitted() {
    let engine = engine();
    engine.append(DOC, SERIES, 0, None, &[1.0]).unwrap();
    engine.append(DOC, SERIES, 10 * HOUR, None, &[1.0]).unwrap();

    let buckets = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::hours(1).unwrap(), &AggregationSet::all())
        .unwrap();
    assert_eq!(
        buckets.iter().map(|b| b.start).collect::<Vec<_>>(),
        vec![0, 10 * HOUR]
    );
}

#[test]
fn test_negative_timestamps_align_to_epoch() {
    let engine = engine();
    engine.append(DOC, SERIES, -1, None, &[1.0]).unwrap();

    let buckets = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::hours(1).unwrap(), &AggregationSet::all())
        .unwrap();
    assert_eq!(buckets[0].start, -HOUR);
    assert_eq!(buckets[0].end, 0);
}

#[test]
fn test_filtered_rollup() {
    let engine = engine();
    engine.append(DOC, SERIES, 0, Some("watches/fitbit"), &[60.0]).unwrap();
    engine.append(DOC, SERIES, 1, Some("watches/apple"), &[90.0]).unwrap();

    let buckets = engine
        .rollup_filtered(
            DOC,
            SERIES,
            TimeRange::all(),
            Granularity::days(1).unwrap(),
            &AggregationSet::all(),
            &EntryFilter::new().with_tag("watches/fitbit"),
        )
        .unwrap();
    assert_eq!(buckets[0].slots[0].max, Some(60.0));
    assert_eq!(buckets[0].entry_count, 1);
}

#[test]
fn test_rollup_of_missing_series_is_empty() {
    let engine = engine();
    let buckets = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::days(1).unwrap(), &AggregationSet::all())
        .unwrap();
    assert!(buckets.is_empty());
}

// ============================================================================
// Materialized Rollups
// ============================================================================

#[test]
fn test_materialize_rollup() {
    let engine = engine();
    for h in 0..72 {
        engine.append(DOC, SERIES, h * HOUR, None, &[h as f64, 1.0]).unwrap();
    }

    let written = engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::all())
        .unwrap();
    assert_eq!(written, 3);

    let target = daily().series_name(SERIES);
    assert_eq!(target, "Heartrate@daily");
    let page = engine.get(DOC, &target, &GetRequest::new()).unwrap();
    assert_eq!(page.entries.len(), 3);
    assert!(page.entries.iter().all(|e| e.is_rollup));
    // Six stored values per raw slot.
    assert_eq!(page.entries[0].values.len(), 12);

    let stats = engine.series_stats(DOC).unwrap();
    assert!(stats.iter().any(|s| s.name == target && s.is_rollup));
}

#[test]
fn test_rollup_over_rollup_series() {
    let engine = engine();
    for h in 0..72 {
        engine.append(DOC, SERIES, h * HOUR, None, &[h as f64]).unwrap();
    }
    engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::all())
        .unwrap();

    let weekly = engine
        .rollup(
            DOC,
            "Heartrate@daily",
            TimeRange::all(),
            Granularity::weeks(1).unwrap(),
            &AggregationSet::all(),
        )
        .unwrap();
    let raw = engine
        .rollup(DOC, SERIES, TimeRange::all(), Granularity::weeks(1).unwrap(), &AggregationSet::all())
        .unwrap();

    assert_eq!(weekly.len(), 1);
    assert_eq!(weekly[0].slots, raw[0].slots);
    assert_eq!(weekly[0].slots[0].count, Some(72));
    assert_eq!(weekly[0].slots[0].min, Some(0.0));
    assert_eq!(weekly[0].slots[0].max, Some(71.0));
}

#[test]
fn test_rematerialize_after_late_write() {
    let engine = engine();
    engine.append(DOC, SERIES, HOUR, None, &[10.0]).unwrap();
    engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::all())
        .unwrap();

    engine.append(DOC, SERIES, 2 * HOUR, None, &[30.0]).unwrap();
    engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::at(2 * HOUR))
        .unwrap();

    let buckets = engine
        .rollup(
            DOC,
            "Heartrate@daily",
            TimeRange::all(),
            Granularity::days(1).unwrap(),
            &AggregationSet::all(),
        )
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].slots[0].count, Some(2));
    assert_eq!(buckets[0].slots[0].max, Some(30.0));
}

#[test]
fn test_rematerialize_after_delete_clears_buckets() {
    let engine = engine();
    engine.append(DOC, SERIES, HOUR, None, &[10.0]).unwrap();
    engine.append(DOC, SERIES, 30 * HOUR, None, &[20.0]).unwrap();
    engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::all())
        .unwrap();

    engine.delete(DOC, SERIES, TimeRange::new(0, 23 * HOUR)).unwrap();
    engine
        .materialize_rollup(DOC, SERIES, &daily(), TimeRange::new(0, 23 * HOUR))
        .unwrap();

    let page = engine.get(DOC, "Heartrate@daily", &GetRequest::new()).unwrap();
    assert_eq!(
        page.entries.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
        vec![24 * HOUR]
    );
}

#[test]
fn test_raw_append_into_rollup_name_rejected() {
    let engine = engine();
    let err = engine.append(DOC, "x@daily", 1, None, &[1.0]).unwrap_err();
    assert!(matches!(err, SeriesError::SchemaMismatch(_)));
    assert!(engine.list_series_names(DOC).is_empty());
}

#[test]
fn test_invalid_granularity() {
    assert!(matches!(
        Granularity::parse("3 fortnights"),
        Err(SeriesError::InvalidGranularity(_))
    ));
    assert!(matches!(
        Granularity::from_nanos(0),
        Err(SeriesError::InvalidGranularity(_))
    ));
}
