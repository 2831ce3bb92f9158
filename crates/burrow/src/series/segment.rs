//! Segment storage and its persisted layout.
//!
//! A segment is a time-ordered, capacity-bounded block of entries of one
//! series. The open segment keeps its entries decoded; every other segment is
//! held in the encoded form below and decoded on read.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (36 bytes, little-endian)                            │
//! │  - Magic: "BSEG" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Flags: u8 (bit 0 = rollup)                                │
//! │  - Reserved: 1 byte                                          │
//! │  - Start / end timestamp: i64 + i64                          │
//! │  - Entry count: u32                                          │
//! │  - Body length: u32                                          │
//! │  - Body CRC32: u32                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Body                                                        │
//! │  - Tag dictionary: u16 count, then (u16 len, UTF-8) each     │
//! │  - Timestamps: u32 len + Gorilla delta-of-delta bitstream    │
//! │  - Tag index column: u16 per entry (0xFFFF = untagged)       │
//! │  - Value count column: u16 per entry                         │
//! │  - Values: u32 len + Gorilla XOR bitstream, all flattened    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tag dictionary is local to the segment, so a blob decodes against any
//! [`TagTable`]: its strings are re-interned on the way in.

use crate::error::{Result, SeriesError};
use crate::series::gorilla::{
    compress_timestamps, compress_values, decompress_timestamps, decompress_values,
};
use crate::series::{Entry, TagId, TagTable, TimeRange, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Magic bytes at the start of every segment: "BSEG".
pub const SEGMENT_MAGIC: [u8; 4] = *b"BSEG";

/// Current segment layout version.
pub const SEGMENT_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 36;

/// Most values one entry can carry; the value-count column is a `u16`.
pub const MAX_VALUES_PER_ENTRY: usize = u16::MAX as usize;

const FLAG_ROLLUP: u8 = 0b0000_0001;
const UNTAGGED: u16 = u16::MAX;

/// Fixed-size segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Layout version.
    pub version: u16,
    /// True if entries hold pre-aggregated rollup state.
    pub is_rollup: bool,
    /// Timestamp of the first entry.
    pub start_ts: Timestamp,
    /// Timestamp of the last entry.
    pub end_ts: Timestamp,
    /// Number of entries.
    pub entry_count: u32,
    /// Length of the body following the header.
    pub body_len: u32,
    /// CRC32 of the body.
    pub body_crc32: u32,
}

impl SegmentHeader {
    /// The time range covered by the segment.
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_ts, self.end_ts)
    }

    /// Appends the header to `out` using little-endian byte order.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SEGMENT_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(if self.is_rollup { FLAG_ROLLUP } else { 0 });
        out.push(0);
        out.extend_from_slice(&self.start_ts.to_le_bytes());
        out.extend_from_slice(&self.end_ts.to_le_bytes());
        out.extend_from_slice(&self.entry_count.to_le_bytes());
        out.extend_from_slice(&self.body_len.to_le_bytes());
        out.extend_from_slice(&self.body_crc32.to_le_bytes());
    }

    /// Reads a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::CorruptSegment` if the buffer is short, the magic
    /// or version is wrong, or the recorded range is not usable.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        let truncated = || SeriesError::corrupt(Timestamp::MIN, "truncated header");
        let mut reader = ByteReader::new(buf);

        let magic = reader.array::<4>().ok_or_else(truncated)?;
        let version = reader.u16().ok_or_else(truncated)?;
        let flags = reader.u8().ok_or_else(truncated)?;
        let _reserved = reader.u8().ok_or_else(truncated)?;
        let start_ts = reader.i64().ok_or_else(truncated)?;
        let end_ts = reader.i64().ok_or_else(truncated)?;
        let entry_count = reader.u32().ok_or_else(truncated)?;
        let body_len = reader.u32().ok_or_else(truncated)?;
        let body_crc32 = reader.u32().ok_or_else(truncated)?;

        if magic != SEGMENT_MAGIC {
            return Err(SeriesError::corrupt(
                start_ts,
                format!("invalid magic {magic:?}"),
            ));
        }
        if version == 0 || version > SEGMENT_VERSION {
            return Err(SeriesError::corrupt(
                start_ts,
                format!("unsupported version {version}"),
            ));
        }
        if entry_count == 0 {
            return Err(SeriesError::corrupt(start_ts, "segment holds no entries"));
        }
        if start_ts > end_ts {
            return Err(SeriesError::corrupt(start_ts, "start is after end"));
        }

        Ok(Self {
            version,
            is_rollup: flags & FLAG_ROLLUP != 0,
            start_ts,
            end_ts,
            entry_count,
            body_len,
            body_crc32,
        })
    }
}

/// Append-only entry storage of an open segment.
///
/// Every snapshot of the segment holds a [`TailView`] onto the same buffer
/// and sees only the prefix it captured. Entries inside a published prefix
/// are never rewritten; anything that would change them builds a new buffer.
#[derive(Debug, Default)]
pub struct TailBuffer {
    entries: RwLock<Vec<Entry>>,
}

/// A length-bounded view of a [`TailBuffer`].
#[derive(Debug, Clone)]
pub struct TailView {
    buffer: Arc<TailBuffer>,
    len: usize,
}

impl TailView {
    /// Creates a view over a fresh buffer holding `entries`.
    pub fn new(entries: Vec<Entry>) -> Self {
        let len = entries.len();
        Self {
            buffer: Arc::new(TailBuffer {
                entries: RwLock::new(entries),
            }),
            len,
        }
    }

    /// Number of entries visible through this view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view shows no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Runs `f` over the visible entries while holding the buffer's read lock.
    pub fn read<R>(&self, f: impl FnOnce(&[Entry]) -> R) -> R {
        let entries = self
            .buffer
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&entries[..self.len.min(entries.len())])
    }

    /// Copies the visible entries.
    pub fn to_vec(&self) -> Vec<Entry> {
        self.read(<[Entry]>::to_vec)
    }

    /// Appends `entry` after the visible entries.
    ///
    /// Entries past this view's length belong to writes that were never
    /// published and are dropped first. Only the single writer of a series
    /// may push, and only through the newest view.
    pub(crate) fn push(&mut self, entry: Entry) {
        let mut entries = self
            .buffer
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.truncate(self.len);
        entries.push(entry);
        self.len = entries.len();
    }

    /// Returns true if both views read the same buffer.
    pub fn shares_buffer(&self, other: &TailView) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<TailBuffer> {
        Arc::downgrade(&self.buffer)
    }
}

/// Contents of a segment.
#[derive(Debug, Clone)]
pub enum SegmentData {
    /// Decoded entries of the open segment.
    Open(TailView),
    /// Encoded blob (header and body) of a sealed segment.
    Sealed(Arc<[u8]>),
}

impl SegmentData {
    /// Encodes `entries` into a sealed segment.
    pub fn seal(entries: &[Entry], is_rollup: bool, tags: &TagTable) -> Result<Self> {
        Ok(SegmentData::Sealed(encode_segment(entries, is_rollup, tags)?.into()))
    }

    /// Returns true if the data is in encoded form.
    pub fn is_sealed(&self) -> bool {
        matches!(self, SegmentData::Sealed(_))
    }

    /// Returns the entries, copying open data and decoding sealed data.
    pub fn entries(&self, tags: &TagTable) -> Result<Vec<Entry>> {
        match self {
            SegmentData::Open(view) => Ok(view.to_vec()),
            SegmentData::Sealed(blob) => {
                let (_, entries) = decode_segment(blob, tags)?;
                Ok(entries)
            }
        }
    }

    /// Returns the persisted form, encoding open data on the fly.
    pub fn to_blob(&self, is_rollup: bool, tags: &TagTable) -> Result<Vec<u8>> {
        match self {
            SegmentData::Open(view) => view.read(|entries| encode_segment(entries, is_rollup, tags)),
            SegmentData::Sealed(blob) => Ok(blob.to_vec()),
        }
    }
}

/// Encodes entries into a segment blob.
///
/// # Arguments
///
/// * `entries` - Entries sorted by timestamp without duplicates; must not be
///   empty
/// * `is_rollup` - Sets the rollup flag in the header
/// * `tags` - Resolves entry tags into the segment's local dictionary
///
/// # Returns
///
/// The header followed by the body. The header records the first and last
/// timestamp, the entry count and a CRC32 of the body.
///
/// # Example
///
/// ```rust
/// use alopex_burrow::series::{decode_segment, encode_segment, Entry};
/// use alopex_burrow::TagTable;
///
/// let tags = TagTable::new();
/// let fitbit = tags.intern("watches/fitbit");
/// let entries = vec![
///     Entry::new(1_000, Some(fitbit), vec![59.0]),
///     Entry::new(2_000, None, vec![61.0, 0.5]),
/// ];
///
/// let blob = encode_segment(&entries, false, &tags).unwrap();
/// let (header, decoded) = decode_segment(&blob, &tags).unwrap();
/// assert_eq!(header.entry_count, 2);
/// assert_eq!(decoded, entries);
/// ```
///
/// # Errors
///
/// Returns `SeriesError::SchemaMismatch` if a tag or value array exceeds what
/// the layout can represent.
pub fn encode_segment(entries: &[Entry], is_rollup: bool, tags: &TagTable) -> Result<Vec<u8>> {
    let mut dictionary: Vec<Arc<str>> = Vec::new();
    let mut local: HashMap<TagId, u16> = HashMap::new();
    let mut tag_column = Vec::with_capacity(entries.len());

    for entry in entries {
        let index = match entry.tag {
            None => UNTAGGED,
            Some(id) => match local.get(&id) {
                Some(&index) => index,
                None => {
                    let name = tags.resolve(id).ok_or_else(|| {
                        SeriesError::SchemaMismatch(format!("{id} is not interned"))
                    })?;
                    if dictionary.len() >= UNTAGGED as usize {
                        return Err(SeriesError::SchemaMismatch(
                            "too many distinct tags in one segment".to_string(),
                        ));
                    }
                    let index = dictionary.len() as u16;
                    dictionary.push(name);
                    local.insert(id, index);
                    index
                }
            },
        };
        tag_column.push(index);
    }

    let mut body = Vec::new();

    body.extend_from_slice(&(dictionary.len() as u16).to_le_bytes());
    for name in &dictionary {
        let len = u16::try_from(name.len()).map_err(|_| {
            SeriesError::SchemaMismatch(format!("tag of {} bytes is too long", name.len()))
        })?;
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(name.as_bytes());
    }

    let timestamps = compress_timestamps(entries.iter().map(|e| e.timestamp)).into_vec();
    body.extend_from_slice(&(timestamps.len() as u32).to_le_bytes());
    body.extend_from_slice(&timestamps);

    for index in &tag_column {
        body.extend_from_slice(&index.to_le_bytes());
    }

    for entry in entries {
        let count = u16::try_from(entry.values.len()).map_err(|_| {
            SeriesError::SchemaMismatch(format!("{} values in one entry", entry.values.len()))
        })?;
        body.extend_from_slice(&count.to_le_bytes());
    }

    let values =
        compress_values(entries.iter().flat_map(|e| e.values.iter().copied())).into_vec();
    body.extend_from_slice(&(values.len() as u32).to_le_bytes());
    body.extend_from_slice(&values);

    let header = SegmentHeader {
        version: SEGMENT_VERSION,
        is_rollup,
        start_ts: entries.first().map_or(0, |e| e.timestamp),
        end_ts: entries.last().map_or(0, |e| e.timestamp),
        entry_count: entries.len() as u32,
        body_len: body.len() as u32,
        body_crc32: crc32fast::hash(&body),
    };

    let mut blob = Vec::with_capacity(HEADER_SIZE + body.len());
    header.write_to(&mut blob);
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Decodes a segment blob, re-interning its tags into `tags`.
///
/// # Errors
///
/// Returns `SeriesError::CorruptSegment` if the header, checksum, or any
/// column fails validation.
pub fn decode_segment(blob: &[u8], tags: &TagTable) -> Result<(SegmentHeader, Vec<Entry>)> {
    let result = SegmentHeader::read_from(blob).and_then(|header| {
        let entries = decode_body(&header, &blob[HEADER_SIZE..], tags)?;
        Ok((header, entries))
    });
    if let Err(err) = &result {
        warn!("Segment failed validation: {}", err);
    }
    result
}

fn decode_body(header: &SegmentHeader, body: &[u8], tags: &TagTable) -> Result<Vec<Entry>> {
    let start = header.start_ts;
    let truncated = || SeriesError::corrupt(start, "truncated body");

    if body.len() != header.body_len as usize {
        return Err(SeriesError::corrupt(
            start,
            format!("body is {} bytes, header says {}", body.len(), header.body_len),
        ));
    }
    if crc32fast::hash(body) != header.body_crc32 {
        return Err(SeriesError::corrupt(start, "checksum mismatch"));
    }

    let count = header.entry_count as usize;
    let mut reader = ByteReader::new(body);

    let dictionary_len = reader.u16().ok_or_else(truncated)?;
    let mut dictionary = Vec::with_capacity(dictionary_len as usize);
    for _ in 0..dictionary_len {
        let len = reader.u16().ok_or_else(truncated)?;
        let bytes = reader.take(len as usize).ok_or_else(truncated)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| SeriesError::corrupt(start, "tag is not valid UTF-8"))?;
        dictionary.push(tags.intern(name));
    }

    let ts_len = reader.u32().ok_or_else(truncated)?;
    let ts_bytes = reader.take(ts_len as usize).ok_or_else(truncated)?;
    let timestamps = decompress_timestamps(ts_bytes, count)
        .ok_or_else(|| SeriesError::corrupt(start, "timestamp column is truncated"))?;

    let mut entry_tags = Vec::new();
    for _ in 0..count {
        let index = reader.u16().ok_or_else(truncated)?;
        let tag = if index == UNTAGGED {
            None
        } else {
            Some(*dictionary.get(index as usize).ok_or_else(|| {
                SeriesError::corrupt(start, format!("tag index {index} out of range"))
            })?)
        };
        entry_tags.push(tag);
    }

    let mut value_counts = Vec::new();
    for _ in 0..count {
        value_counts.push(reader.u16().ok_or_else(truncated)? as usize);
    }
    let total_values: usize = value_counts.iter().sum();

    let values_len = reader.u32().ok_or_else(truncated)?;
    let value_bytes = reader.take(values_len as usize).ok_or_else(truncated)?;
    let values = decompress_values(value_bytes, total_values)
        .ok_or_else(|| SeriesError::corrupt(start, "value column is truncated"))?;

    if reader.remaining() != 0 {
        return Err(SeriesError::corrupt(start, "trailing bytes after value column"));
    }
    if timestamps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(SeriesError::corrupt(start, "timestamps are not strictly ascending"));
    }
    if timestamps.first() != Some(&header.start_ts) || timestamps.last() != Some(&header.end_ts) {
        return Err(SeriesError::corrupt(start, "timestamps do not match header range"));
    }

    let mut entries = Vec::with_capacity(timestamps.len());
    let mut offset = 0;
    for ((timestamp, tag), value_count) in timestamps.into_iter().zip(entry_tags).zip(value_counts) {
        let values = values[offset..offset + value_count].to_vec();
        offset += value_count;
        entries.push(Entry::new(timestamp, tag, values));
    }
    Ok(entries)
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.array().map(i64::from_le_bytes)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
