//! Per-series segment index.
//!
//! Keeps the segments of one series ordered by time with pairwise disjoint
//! ranges. Segment contents are shared, so cloning an index is a cheap
//! snapshot: writers mutate a clone and swap it in, readers keep whatever
//! they cloned. Sealed blobs are immutable; the open segment is an
//! append-only buffer whose snapshots each see the prefix they captured.

use crate::error::{Result, SeriesError};
use crate::series::{Entry, SegmentData, TagTable, TailView, TimeRange, Timestamp};

/// Summary of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Inclusive range from first to last entry.
    pub range: TimeRange,
    /// Number of entries.
    pub entry_count: usize,
    /// True if entries hold rollup state.
    pub is_rollup: bool,
    /// False only for the open tail segment.
    pub sealed: bool,
}

/// A descriptor together with the segment contents.
#[derive(Debug, Clone)]
pub struct SegmentSlot {
    /// Segment summary.
    pub descriptor: SegmentDescriptor,
    /// Shared contents.
    pub data: SegmentData,
}

impl SegmentSlot {
    /// Builds an open segment. `entries` must be sorted and non-empty.
    pub fn open(entries: Vec<Entry>, is_rollup: bool) -> Self {
        Self {
            descriptor: describe(&entries, is_rollup, false),
            data: SegmentData::Open(TailView::new(entries)),
        }
    }

    /// Builds a sealed segment. `entries` must be sorted and non-empty.
    pub fn sealed(entries: &[Entry], is_rollup: bool, tags: &TagTable) -> Result<Self> {
        Ok(Self {
            descriptor: describe(entries, is_rollup, true),
            data: SegmentData::seal(entries, is_rollup, tags)?,
        })
    }

    /// Builds a segment that is sealed or open as requested.
    pub fn with_state(
        entries: Vec<Entry>,
        is_rollup: bool,
        sealed: bool,
        tags: &TagTable,
    ) -> Result<Self> {
        if sealed {
            Self::sealed(&entries, is_rollup, tags)
        } else {
            Ok(Self::open(entries, is_rollup))
        }
    }

    /// Wraps a persisted blob, validating only its header.
    pub fn from_blob(blob: Vec<u8>) -> Result<Self> {
        let header = super::SegmentHeader::read_from(&blob)?;
        Ok(Self {
            descriptor: SegmentDescriptor {
                range: header.range(),
                entry_count: header.entry_count as usize,
                is_rollup: header.is_rollup,
                sealed: true,
            },
            data: SegmentData::Sealed(blob.into()),
        })
    }

    /// Returns the entries of the segment.
    pub fn entries(&self, tags: &TagTable) -> Result<Vec<Entry>> {
        self.data.entries(tags)
    }

    /// Returns the persisted form of the segment.
    pub fn to_blob(&self, tags: &TagTable) -> Result<Vec<u8>> {
        self.data.to_blob(self.descriptor.is_rollup, tags)
    }

    /// Appends to the tail of an open segment, handing the entry back if the
    /// segment is sealed.
    ///
    /// Nothing is copied: snapshots taken earlier keep their shorter view of
    /// the same buffer.
    pub(crate) fn push_open(&mut self, entry: Entry) -> std::result::Result<(), Entry> {
        let SegmentData::Open(view) = &mut self.data else {
            return Err(entry);
        };
        self.descriptor.range.to = entry.timestamp;
        view.push(entry);
        self.descriptor.entry_count = view.len();
        Ok(())
    }
}

fn describe(entries: &[Entry], is_rollup: bool, sealed: bool) -> SegmentDescriptor {
    let from = entries.first().map_or(0, |e| e.timestamp);
    let to = entries.last().map_or(from, |e| e.timestamp);
    SegmentDescriptor {
        range: TimeRange::new(from, to),
        entry_count: entries.len(),
        is_rollup,
        sealed,
    }
}

/// Ordered, non-overlapping segments of one series.
#[derive(Debug, Clone, Default)]
pub struct SeriesIndex {
    slots: Vec<SegmentSlot>,
    is_rollup: bool,
}

impl SeriesIndex {
    /// Creates an empty index.
    pub fn new(is_rollup: bool) -> Self {
        Self {
            slots: Vec::new(),
            is_rollup,
        }
    }

    /// True if the series stores rollup entries.
    pub fn is_rollup(&self) -> bool {
        self.is_rollup
    }

    /// All segments in time order.
    pub fn slots(&self) -> &[SegmentSlot] {
        &self.slots
    }

    /// Mutable access to one segment; the range must not be changed so that
    /// it overlaps a neighbour.
    pub(crate) fn slot_mut(&mut self, idx: usize) -> Option<&mut SegmentSlot> {
        self.slots.get_mut(idx)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the series has no segments.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of entries across segments.
    pub fn entry_count(&self) -> usize {
        self.slots.iter().map(|s| s.descriptor.entry_count).sum()
    }

    /// Range from the first to the last entry of the series.
    pub fn span(&self) -> Option<TimeRange> {
        let first = self.slots.first()?;
        let last = self.slots.last()?;
        Some(TimeRange::new(
            first.descriptor.range.from,
            last.descriptor.range.to,
        ))
    }

    /// Returns the index of the segment whose range contains `ts`.
    pub fn locate(&self, ts: Timestamp) -> Option<usize> {
        let idx = self.slots.partition_point(|s| s.descriptor.range.to < ts);
        self.slots
            .get(idx)
            .filter(|s| s.descriptor.range.from <= ts)
            .map(|_| idx)
    }

    /// Returns the index of the last segment starting at or before `ts`.
    pub fn preceding(&self, ts: Timestamp) -> Option<usize> {
        self.slots
            .partition_point(|s| s.descriptor.range.from <= ts)
            .checked_sub(1)
    }

    /// Index bounds `lo..hi` of the segments intersecting `range`.
    pub fn range_bounds(&self, range: TimeRange) -> std::ops::Range<usize> {
        let lo = self.slots.partition_point(|s| s.descriptor.range.to < range.from);
        let hi = self.slots.partition_point(|s| s.descriptor.range.from <= range.to);
        lo..hi.max(lo)
    }

    /// Segments intersecting `range`, in time order.
    pub fn range_segments(&self, range: TimeRange) -> &[SegmentSlot] {
        &self.slots[self.range_bounds(range)]
    }

    /// Inserts a segment at its ordered position.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::OverlapViolation` if its range intersects an
    /// existing segment.
    pub fn insert_segment(&mut self, slot: SegmentSlot) -> Result<usize> {
        let range = slot.descriptor.range;
        let pos = self.slots.partition_point(|s| s.descriptor.range.from < range.from);

        let neighbours = pos
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .into_iter()
            .chain(self.slots.get(pos));
        for existing in neighbours {
            if existing.descriptor.range.intersects(&range) {
                return Err(SeriesError::OverlapViolation {
                    start: range.from,
                    end: range.to,
                    existing_start: existing.descriptor.range.from,
                    existing_end: existing.descriptor.range.to,
                });
            }
        }

        self.slots.insert(pos, slot);
        Ok(pos)
    }

    /// Removes and returns the segment at `idx`.
    pub fn remove_segment(&mut self, idx: usize) -> Option<SegmentSlot> {
        (idx < self.slots.len()).then(|| self.slots.remove(idx))
    }

    /// Replaces the segments at `range` with `replacement`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::OverlapViolation` if the replacement does not fit
    /// between the neighbours; the index is left unchanged in that case.
    pub fn replace(
        &mut self,
        range: std::ops::Range<usize>,
        replacement: Vec<SegmentSlot>,
    ) -> Result<()> {
        let before = range.start.checked_sub(1).and_then(|i| self.slots.get(i));
        let after = self.slots.get(range.end);
        let chain = before
            .into_iter()
            .chain(replacement.iter())
            .chain(after)
            .map(|s| s.descriptor.range)
            .collect::<Vec<_>>();

        for pair in chain.windows(2) {
            if pair[0].to >= pair[1].from {
                return Err(SeriesError::OverlapViolation {
                    start: pair[1].from,
                    end: pair[1].to,
                    existing_start: pair[0].from,
                    existing_end: pair[0].to,
                });
            }
        }

        self.slots.splice(range, replacement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(timestamps: &[i64]) -> SegmentSlot {
        let entries = timestamps
            .iter()
            .map(|&ts| Entry::new(ts, None, vec![ts as f64]))
            .collect();
        SegmentSlot::open(entries, false)
    }

    fn index() -> SeriesIndex {
        let mut index = SeriesIndex::new(false);
        index.insert_segment(slot(&[10, 20])).unwrap();
        index.insert_segment(slot(&[30, 40])).unwrap();
        index.insert_segment(slot(&[50, 60])).unwrap();
        index
    }

    #[test]
    fn test_locate() {
        let index = index();
        assert_eq!(index.locate(10), Some(0));
        assert_eq!(index.locate(20), Some(0));
        assert_eq!(index.locate(35), Some(1));
        assert_eq!(index.locate(25), None);
        assert_eq!(index.locate(5), None);
        assert_eq!(index.locate(61), None);
    }

    #[test]
    fn test_preceding() {
        let index = index();
        assert_eq!(index.preceding(5), None);
        assert_eq!(index.preceding(25), Some(0));
        assert_eq!(index.preceding(70), Some(2));
    }

    #[test]
    fn test_range_segments() {
        let index = index();
        let hit = |from, to| {
            index
                .range_segments(TimeRange::new(from, to))
                .iter()
                .map(|s| s.descriptor.range.from)
                .collect::<Vec<_>>()
        };
        assert_eq!(hit(0, 100), vec![10, 30, 50]);
        assert_eq!(hit(20, 30), vec![10, 30]);
        assert_eq!(hit(21, 29), Vec::<i64>::new());
        assert_eq!(hit(60, 60), vec![50]);
        assert_eq!(hit(61, 90), Vec::<i64>::new());
    }

    #[test]
    fn test_insert_overlap_rejected() {
        let mut index = index();
        let err = index.insert_segment(slot(&[15, 25])).unwrap_err();
        assert!(matches!(
            err,
            SeriesError::OverlapViolation {
                existing_start: 10,
                ..
            }
        ));
        assert!(index.insert_segment(slot(&[40])).is_err());
        assert_eq!(index.insert_segment(slot(&[22, 28])).unwrap(), 1);
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_replace_checks_neighbours() {
        let mut index = index();
        assert!(index.replace(1..2, vec![slot(&[20, 35])]).is_err());
        assert_eq!(index.len(), 3);

        index.replace(1..2, vec![slot(&[30, 33]), slot(&[36, 40])]).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.entry_count(), 8);
        assert_eq!(index.span(), Some(TimeRange::new(10, 60)));
    }

    #[test]
    fn test_push_open_keeps_snapshot_prefix() {
        let mut index = index();
        let snapshot = index.clone();
        let tail = index.slot_mut(2).unwrap();
        assert!(tail.push_open(Entry::new(70, None, vec![7.0])).is_ok());

        assert_eq!(index.entry_count(), 7);
        assert_eq!(snapshot.entry_count(), 6);
        let tags = TagTable::new();
        assert_eq!(snapshot.slots()[2].entries(&tags).unwrap().len(), 2);
    }

    #[test]
    fn test_push_open_reuses_buffer() {
        let mut index = SeriesIndex::new(false);
        index.insert_segment(slot(&[0])).unwrap();
        let SegmentData::Open(first) = &index.slots()[0].data else {
            panic!("tail should be open");
        };
        let buffer = first.downgrade();

        for ts in 1..100 {
            let tail = index.slot_mut(0).unwrap();
            assert!(tail.push_open(Entry::new(ts, None, vec![ts as f64])).is_ok());
        }

        let SegmentData::Open(view) = &index.slots()[0].data else {
            panic!("tail should be open");
        };
        assert!(std::sync::Weak::ptr_eq(&buffer, &view.downgrade()));
        assert_eq!(view.len(), 100);
    }

    #[test]
    fn test_push_open_rejects_sealed() {
        let tags = TagTable::new();
        let entries = [Entry::new(1, None, vec![1.0])];
        let mut sealed = SegmentSlot::sealed(&entries, false, &tags).unwrap();
        assert!(sealed.push_open(Entry::new(2, None, vec![2.0])).is_err());
        assert_eq!(sealed.descriptor.entry_count, 1);
    }
}
