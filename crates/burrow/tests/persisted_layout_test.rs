//! Integration tests for exporting and importing persisted segments.
//!
//! Covers:
//! - Export / import round trip into a fresh engine
//! - Damaged bodies failing only reads of their own segment
//! - Header validation at import time

use alopex_burrow::series::{SegmentHeader, HEADER_SIZE};
use alopex_burrow::{
    EngineConfig, GetRequest, InMemoryDocumentStore, SeriesError, TimeRange, TimeSeriesEngine,
};
use std::sync::Arc;

const DOC: &str = "users/ayende";
const SERIES: &str = "Heartrate";

fn engine() -> TimeSeriesEngine {
    let store = Arc::new(InMemoryDocumentStore::new());
    store.insert(DOC, "Users");
    TimeSeriesEngine::new(store, EngineConfig::default().with_segment_capacity(10))
}

fn populated() -> (TimeSeriesEngine, Vec<Vec<u8>>) {
    let engine = engine();
    for ts in 0..30i64 {
        let tag = if ts % 3 == 0 { Some("watches/fitbit") } else { None };
        engine
            .append(DOC, SERIES, ts * 1_000, tag, &[ts as f64, 0.5 * ts as f64])
            .unwrap();
    }
    let blobs = engine.export_series(DOC, SERIES).unwrap();
    (engine, blobs)
}

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn test_export_import_roundtrip() {
    let (source, blobs) = populated();
    assert_eq!(blobs.len(), 3);

    let target = engine();
    target.import_series(DOC, SERIES, blobs).unwrap();

    let expected = source.get(DOC, SERIES, &GetRequest::new()).unwrap().entries;
    let actual = target.get(DOC, SERIES, &GetRequest::new()).unwrap().entries;
    assert_eq!(actual, expected);
    assert_eq!(actual[3].tag(), Some("watches/fitbit"));
}

#[test]
fn test_headers_describe_segments() {
    let (_, blobs) = populated();
    let headers: Vec<SegmentHeader> = blobs
        .iter()
        .map(|blob| SegmentHeader::read_from(blob).unwrap())
        .collect();

    assert_eq!(headers[0].start_ts, 0);
    assert_eq!(headers[0].end_ts, 9_000);
    assert_eq!(headers[2].end_ts, 29_000);
    assert!(headers.iter().all(|h| h.entry_count == 10 && !h.is_rollup));
    assert!(headers.windows(2).all(|w| w[0].end_ts < w[1].start_ts));
}

#[test]
fn test_append_after_import() {
    let (_, blobs) = populated();
    let target = engine();
    target.import_series(DOC, SERIES, blobs).unwrap();

    target.append(DOC, SERIES, 30_000, None, &[30.0]).unwrap();
    target.append(DOC, SERIES, 4_500, None, &[4.5]).unwrap();

    let page = target.get(DOC, SERIES, &GetRequest::new()).unwrap();
    assert_eq!(page.entries.len(), 32);
    assert!(page.entries.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn test_import_replaces_series() {
    let (_, blobs) = populated();
    let target = engine();
    target.append(DOC, SERIES, 99_000, None, &[1.0]).unwrap();
    target.import_series(DOC, SERIES, blobs).unwrap();

    let page = target.get(DOC, SERIES, &GetRequest::new()).unwrap();
    assert_eq!(page.entries.len(), 30);
    assert_eq!(page.entries.last().unwrap().timestamp, 29_000);
}

// ============================================================================
// Damage Handling
// ============================================================================

#[test]
fn test_corrupt_body_fails_only_its_segment() {
    let (_, mut blobs) = populated();
    let last = blobs[1].len() - 1;
    blobs[1][last] ^= 0xFF;

    let target = engine();
    target.import_series(DOC, SERIES, blobs).unwrap();

    let before = target
        .get(DOC, SERIES, &GetRequest::new().between(0, 9_000))
        .unwrap();
    assert_eq!(before.entries.len(), 10);
    let after = target
        .get(DOC, SERIES, &GetRequest::new().between(20_000, 29_000))
        .unwrap();
    assert_eq!(after.entries.len(), 10);

    let err = target
        .get(DOC, SERIES, &GetRequest::new().between(15_000, 16_000))
        .unwrap_err();
    assert!(matches!(err, SeriesError::CorruptSegment { start: 10_000, .. }));
}

#[test]
fn test_delete_covering_corrupt_segment_drops_it() {
    let (_, mut blobs) = populated();
    blobs[1][HEADER_SIZE] ^= 0xFF;

    let target = engine();
    target.import_series(DOC, SERIES, blobs).unwrap();
    target.delete(DOC, SERIES, TimeRange::new(10_000, 19_000)).unwrap();

    let page = target.get(DOC, SERIES, &GetRequest::new()).unwrap();
    assert_eq!(page.entries.len(), 20);
}

#[test]
fn test_bad_header_rejects_import() {
    let (_, mut blobs) = populated();
    blobs[2][0] = b'X';

    let target = engine();
    let err = target.import_series(DOC, SERIES, blobs).unwrap_err();
    assert!(matches!(err, SeriesError::CorruptSegment { .. }));
    assert!(target.list_series_names(DOC).is_empty());
}

#[test]
fn test_truncated_header_rejects_import() {
    let target = engine();
    let err = target
        .import_series(DOC, SERIES, vec![b"BSEG".to_vec()])
        .unwrap_err();
    assert!(matches!(err, SeriesError::CorruptSegment { .. }));
}

#[test]
fn test_overlapping_segments_rejected() {
    let (_, blobs) = populated();
    let target = engine();
    let err = target
        .import_series(DOC, SERIES, vec![blobs[0].clone(), blobs[0].clone()])
        .unwrap_err();
    assert!(matches!(err, SeriesError::OverlapViolation { .. }));
}
