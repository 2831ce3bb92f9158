//! Property-based tests for the column codecs, the segment layout, and
//! engine ordering.
//!
//! Timestamp deltas are unrestricted: the 64-bit escape makes every `i64`
//! sequence round-trip, including nanosecond series that step by minutes.

use alopex_burrow::series::gorilla::{
    compress_timestamps, compress_values, decompress_timestamps, decompress_values,
};
use alopex_burrow::series::{decode_segment, encode_segment, Entry, HEADER_SIZE};
use alopex_burrow::{
    EngineConfig, GetRequest, InMemoryDocumentStore, TagTable, TimeRange, TimeSeriesEngine,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arbitrary sorted, unique timestamps spanning the whole `i64` domain.
fn sorted_timestamps() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(any::<i64>(), 1..200)
        .prop_map(|set| set.into_iter().collect())
}

/// Nanosecond series sampled every few minutes with jitter.
fn nanosecond_series() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(60_000_000_000i64..600_000_000_000, 1..200).prop_map(|steps| {
        let mut ts = 1_700_000_000_000_000_000i64;
        steps
            .into_iter()
            .map(|step| {
                ts += step;
                ts
            })
            .collect()
    })
}

/// Writes in arbitrary order, with duplicates, and a tag choice per write.
fn writes() -> impl Strategy<Value = Vec<(i64, f64, Option<u8>)>> {
    prop::collection::vec(
        (-5_000i64..5_000, -1_000.0f64..1_000.0, prop::option::of(0u8..4)),
        1..300,
    )
}

proptest! {
    /// Timestamps round-trip for arbitrary sorted input.
    #[test]
    fn test_timestamp_roundtrip_proptest(timestamps in sorted_timestamps()) {
        let bytes = compress_timestamps(timestamps.iter().copied()).into_vec();
        let decoded = decompress_timestamps(&bytes, timestamps.len());
        prop_assert_eq!(decoded, Some(timestamps));
    }

    /// Realistic nanosecond series round-trip.
    #[test]
    fn test_nanosecond_series_roundtrip_proptest(timestamps in nanosecond_series()) {
        let bytes = compress_timestamps(timestamps.iter().copied()).into_vec();
        prop_assert_eq!(decompress_timestamps(&bytes, timestamps.len()), Some(timestamps));
    }

    /// Values round-trip bit for bit, including NaN payloads and infinities.
    #[test]
    fn test_value_roundtrip_proptest(bits in prop::collection::vec(any::<u64>(), 1..200)) {
        let values: Vec<f64> = bits.iter().map(|&b| f64::from_bits(b)).collect();
        let bytes = compress_values(values.iter().copied()).into_vec();
        let decoded = decompress_values(&bytes, values.len()).unwrap();
        prop_assert_eq!(decoded.iter().map(|v| v.to_bits()).collect::<Vec<_>>(), bits);
    }

    /// Asking for more entries than were encoded never panics.
    #[test]
    fn test_decoder_overrun_proptest(timestamps in sorted_timestamps(), extra in 1usize..64) {
        let bytes = compress_timestamps(timestamps.iter().copied()).into_vec();
        // Trailing padding may decode as zero deltas; anything is fine but a panic.
        let _ = decompress_timestamps(&bytes, timestamps.len() + extra);
        let _ = decompress_timestamps(&bytes[..bytes.len() / 2], timestamps.len());
    }

    /// Garbled segment bodies are rejected, never decoded into wrong data.
    #[test]
    fn test_segment_bitflip_detected_proptest(
        byte in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let tags = TagTable::new();
        let fitbit = tags.intern("watches/fitbit");
        let entries: Vec<Entry> = (0..32i64)
            .map(|i| {
                let tag = (i % 2 == 0).then_some(fitbit);
                Entry::new(i * 1_000, tag, vec![i as f64, 60.0])
            })
            .collect();
        let mut blob = encode_segment(&entries, false, &tags).unwrap();

        let offset = HEADER_SIZE + byte.index(blob.len() - HEADER_SIZE);
        blob[offset] ^= 1 << bit;
        prop_assert!(decode_segment(&blob, &tags).is_err());
    }

    /// Reads return entries sorted and unique, with the last write per
    /// timestamp winning.
    #[test]
    fn test_engine_ordering_proptest(writes in writes(), capacity in 2usize..16) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert("users/ayende", "Users");
        let engine = TimeSeriesEngine::new(
            store,
            EngineConfig::default().with_segment_capacity(capacity),
        );

        let mut expected = BTreeMap::new();
        for (ts, value, tag) in &writes {
            let tag = tag.map(|t| format!("watches/{t}"));
            engine
                .append("users/ayende", "Heartrate", *ts, tag.as_deref(), &[*value])
                .unwrap();
            expected.insert(*ts, (*value, tag));
        }

        let page = engine
            .get("users/ayende", "Heartrate", &GetRequest::new())
            .unwrap();
        let actual: Vec<_> = page
            .entries
            .iter()
            .map(|e| (e.timestamp, (e.values[0], e.tag().map(str::to_string))))
            .collect();
        let expected: Vec<_> = expected.into_iter().collect();
        prop_assert_eq!(actual, expected);

        let stats = &engine.series_stats("users/ayende").unwrap()[0];
        prop_assert!(stats.segment_count * capacity >= stats.entry_count);

        let window = engine
            .get("users/ayende", "Heartrate", &GetRequest::new().between(-100, 100))
            .unwrap();
        prop_assert!(window.entries.iter().all(|e| TimeRange::new(-100, 100).contains(e.timestamp)));
    }
}
