//! Segment split and merge.
//!
//! Segments grow past capacity only through backfill into a sealed range;
//! they are then split at the median timestamp. Deletions leave segments
//! partly empty; fragments are folded into a neighbour when both fit.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::series::{Entry, SegmentSlot, SeriesIndex, TagTable};
use tracing::debug;

/// Splits `entries` at the median until every chunk fits `capacity`.
pub fn split_at_median(entries: Vec<Entry>, capacity: usize) -> Vec<Vec<Entry>> {
    let capacity = capacity.max(1);
    if entries.len() <= capacity {
        return vec![entries];
    }
    let mut left = entries;
    let right = left.split_off(left.len() / 2);
    let mut chunks = split_at_median(left, capacity);
    chunks.extend(split_at_median(right, capacity));
    chunks
}

/// Builds the segments that replace one rewritten segment.
///
/// Every chunk is sealed, except that the last one stays open when the
/// rewritten segment was the open tail.
pub fn rebuild_segments(
    entries: Vec<Entry>,
    is_rollup: bool,
    open_tail: bool,
    config: &EngineConfig,
    tags: &TagTable,
) -> Result<Vec<SegmentSlot>> {
    let chunks = split_at_median(entries, config.segment_capacity);
    if chunks.len() > 1 {
        debug!(
            "Split segment into {} parts at capacity {}",
            chunks.len(),
            config.segment_capacity
        );
    }
    let last = chunks.len().saturating_sub(1);
    chunks
        .into_iter()
        .enumerate()
        .filter(|(_, chunk)| !chunk.is_empty())
        .map(|(i, chunk)| SegmentSlot::with_state(chunk, is_rollup, !(open_tail && i == last), tags))
        .collect()
}

/// Merges adjacent segments where at least one is below the merge floor and
/// the pair fits in one segment. Returns the number of merges.
///
/// A pair containing an undecodable segment is left alone.
pub fn merge_fragments(
    index: &mut SeriesIndex,
    config: &EngineConfig,
    tags: &TagTable,
) -> Result<usize> {
    let floor = config.merge_floor();
    let mut merges = 0;
    let mut i = 0;

    while i + 1 < index.len() {
        let left = &index.slots()[i];
        let right = &index.slots()[i + 1];
        let (a, b) = (left.descriptor, right.descriptor);
        let fragmented = a.entry_count < floor || b.entry_count < floor;
        if !fragmented || a.entry_count + b.entry_count > config.segment_capacity {
            i += 1;
            continue;
        }

        let merged = match (left.entries(tags), right.entries(tags)) {
            (Ok(l), Ok(r)) => {
                let mut entries = l;
                entries.extend(r);
                entries
            }
            _ => {
                i += 1;
                continue;
            }
        };
        let slot = SegmentSlot::with_state(merged, index.is_rollup(), b.sealed, tags)?;
        index.replace(i..i + 2, vec![slot])?;
        merges += 1;
    }

    if merges > 0 {
        debug!("Merged {} fragmented segment pairs", merges);
    }
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(range: std::ops::Range<i64>) -> Vec<Entry> {
        range.map(|ts| Entry::new(ts, None, vec![ts as f64])).collect()
    }

    #[test]
    fn test_split_at_median() {
        let chunks = split_at_median(entries(0..9), 8);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4);
        assert_eq!(chunks[1].len(), 5);
        assert_eq!(chunks[1][0].timestamp, 4);

        let chunks = split_at_median(entries(0..100), 10);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 100);
    }

    #[test]
    fn test_rebuild_keeps_tail_open() {
        let tags = TagTable::new();
        let config = EngineConfig::default().with_segment_capacity(4);
        let slots = rebuild_segments(entries(0..5), false, true, &config, &tags).unwrap();

        assert_eq!(slots.len(), 2);
        assert!(slots[0].descriptor.sealed);
        assert!(!slots[1].descriptor.sealed);
    }

    #[test]
    fn test_merge_fragments() {
        let tags = TagTable::new();
        let config = EngineConfig::default()
            .with_segment_capacity(8)
            .with_merge_threshold(0.5);
        let mut index = SeriesIndex::new(false);
        index
            .insert_segment(SegmentSlot::sealed(&entries(0..2), false, &tags).unwrap())
            .unwrap();
        index
            .insert_segment(SegmentSlot::sealed(&entries(10..13), false, &tags).unwrap())
            .unwrap();
        index
            .insert_segment(SegmentSlot::open(entries(20..27), false))
            .unwrap();

        let merges = merge_fragments(&mut index, &config, &tags).unwrap();
        assert_eq!(merges, 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.slots()[0].descriptor.entry_count, 5);
        assert!(!index.slots()[1].descriptor.sealed);
        assert_eq!(index.entry_count(), 12);
    }
}
