//! Gorilla column codecs for sealed segments.
//!
//! Sealed segments store their timestamp column and their flattened value
//! column as two independent bitstreams.
//!
//! # Timestamp Encoding (Delta-of-Delta)
//!
//! - First value: 64 bits raw
//! - Subsequent values, by delta-of-delta:
//!   - `0`: `'0'` (1 bit)
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - fits in `i32`: `'11110'` + 32 bits
//!   - else: `'11111'` + 64 bits
//!
//! Nanosecond series routinely step by more than `i32::MAX` (one entry per
//! minute already does), hence the 64-bit escape. Deltas use wrapping
//! arithmetic so every `i64` sequence round-trips.
//!
//! # Value Encoding (XOR)
//!
//! - First value: 64 bits raw (IEEE 754)
//! - Subsequent values:
//!   - XOR = 0: `'0'` (1 bit)
//!   - Same window: `'10'` + meaningful bits
//!   - New window: `'11'` + 5 bits leading + 6 bits length + meaningful bits
//!
//! Decoders never index past the end of their input: a truncated or garbled
//! stream yields `None`, which the segment codec reports as corruption.

use bitvec::prelude::*;

/// Bit buffer used by all encoders.
pub type Bits = BitVec<u8, Msb0>;

fn push_bits(output: &mut Bits, value: u64, width: u32) {
    for i in (0..width).rev() {
        output.push((value >> i) & 1 == 1);
    }
}

struct BitCursor<'a> {
    data: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitCursor<'a> {
    fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let bit = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(bit)
    }

    fn read_bits(&mut self, width: u32) -> Option<u64> {
        if self.pos + width as usize > self.data.len() {
            return None;
        }
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.data[self.pos]);
            self.pos += 1;
        }
        Some(value)
    }
}

/// Encoder for timestamps using delta-of-delta encoding.
#[derive(Debug, Default)]
pub struct TimestampEncoder {
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    /// Creates a new timestamp encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a timestamp into the output bit vector.
    pub fn encode(&mut self, timestamp: i64, output: &mut Bits) {
        if !self.started {
            // First timestamp: write 64 bits raw
            self.started = true;
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            push_bits(output, timestamp as u64, 64);
            return;
        }

        let delta = timestamp.wrapping_sub(self.prev_ts);
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            // Case 1: delta-of-delta is 0 -> 1 bit '0'
            output.push(false);
        } else if (-63..=64).contains(&dod) {
            // Case 2: [-63, 64] -> '10' + 7 bits
            push_bits(output, 0b10, 2);
            push_bits(output, (dod + 63) as u64, 7); // shift to unsigned
        } else if (-255..=256).contains(&dod) {
            // Case 3: [-255, 256] -> '110' + 9 bits
            push_bits(output, 0b110, 3);
            push_bits(output, (dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            // Case 4: [-2047, 2048] -> '1110' + 12 bits
            push_bits(output, 0b1110, 4);
            push_bits(output, (dod + 2047) as u64, 12);
        } else if let Ok(small) = i32::try_from(dod) {
            // Case 5: fits in i32 -> '11110' + 32 bits
            push_bits(output, 0b11110, 5);
            push_bits(output, u64::from(small as u32), 32);
        } else {
            // Case 6: anything else -> '11111' + 64 bits
            push_bits(output, 0b11111, 5);
            push_bits(output, dod as u64, 64);
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }
}

/// Decoder for delta-of-delta encoded timestamps.
pub struct TimestampDecoder<'a> {
    cursor: BitCursor<'a>,
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl<'a> TimestampDecoder<'a> {
    /// Creates a new timestamp decoder.
    pub fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self {
            cursor: BitCursor::new(data),
            started: false,
            prev_ts: 0,
            prev_delta: 0,
        }
    }

    /// Decodes the next timestamp, or `None` if the stream is exhausted or
    /// truncated.
    pub fn decode_next(&mut self) -> Option<i64> {
        if !self.started {
            let ts = self.cursor.read_bits(64)? as i64;
            self.started = true;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Some(ts);
        }

        let dod = if !self.cursor.read_bit()? {
            0
        } else if !self.cursor.read_bit()? {
            self.cursor.read_bits(7)? as i64 - 63
        } else if !self.cursor.read_bit()? {
            self.cursor.read_bits(9)? as i64 - 255
        } else if !self.cursor.read_bit()? {
            self.cursor.read_bits(12)? as i64 - 2047
        } else if !self.cursor.read_bit()? {
            i64::from(self.cursor.read_bits(32)? as u32 as i32)
        } else {
            self.cursor.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        let ts = self.prev_ts.wrapping_add(delta);
        self.prev_delta = delta;
        self.prev_ts = ts;

        Some(ts)
    }
}

/// Encoder for float values using XOR compression.
#[derive(Debug, Default)]
pub struct ValueEncoder {
    started: bool,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueEncoder {
    /// Creates a new value encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a float value into the output bit vector.
    pub fn encode(&mut self, value: f64, output: &mut Bits) {
        let bits = value.to_bits();

        if !self.started {
            // First value: write 64 bits raw
            self.started = true;
            self.prev_value = bits;
            push_bits(output, bits, 64);
            return;
        }

        let xor = bits ^ self.prev_value;

        if xor == 0 {
            // Same value: '0'
            output.push(false);
        } else {
            // The 5-bit header cannot express more than 31 leading zeros; the
            // excess is carried as meaningful bits instead.
            let leading = xor.leading_zeros().min(31);
            let trailing = xor.trailing_zeros();

            if self.started_window() && leading >= self.prev_leading && trailing >= self.prev_trailing
            {
                // Fits the previous window: '10' + meaningful bits
                output.push(true);
                output.push(false);
                let meaningful = 64 - self.prev_leading - self.prev_trailing;
                push_bits(output, xor >> self.prev_trailing, meaningful);
            } else {
                // New window: '11' + 5 bits leading + 6 bits length + meaningful bits
                output.push(true);
                output.push(true);
                let meaningful = 64 - leading - trailing;
                push_bits(output, u64::from(leading), 5);
                push_bits(output, u64::from(meaningful - 1), 6);
                push_bits(output, xor >> trailing, meaningful);
                self.prev_leading = leading;
                self.prev_trailing = trailing;
            }
        }

        self.prev_value = bits;
    }

    fn started_window(&self) -> bool {
        self.prev_leading + self.prev_trailing > 0
    }
}

/// Decoder for XOR-encoded float values.
pub struct ValueDecoder<'a> {
    cursor: BitCursor<'a>,
    started: bool,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl<'a> ValueDecoder<'a> {
    /// Creates a new value decoder.
    pub fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self {
            cursor: BitCursor::new(data),
            started: false,
            prev_value: 0,
            prev_leading: 0,
            prev_trailing: 0,
        }
    }

    /// Decodes the next value, or `None` if the stream is exhausted or
    /// truncated.
    pub fn decode_next(&mut self) -> Option<f64> {
        if !self.started {
            let bits = self.cursor.read_bits(64)?;
            self.started = true;
            self.prev_value = bits;
            return Some(f64::from_bits(bits));
        }

        let xor = if !self.cursor.read_bit()? {
            0
        } else if !self.cursor.read_bit()? {
            let meaningful = 64u32.checked_sub(self.prev_leading + self.prev_trailing)?;
            if meaningful == 0 {
                return None;
            }
            self.cursor.read_bits(meaningful)? << self.prev_trailing
        } else {
            let leading = self.cursor.read_bits(5)? as u32;
            let meaningful = self.cursor.read_bits(6)? as u32 + 1;
            let trailing = 64u32.checked_sub(leading + meaningful)?;
            let value = self.cursor.read_bits(meaningful)?;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            value << trailing
        };

        let bits = self.prev_value ^ xor;
        self.prev_value = bits;

        Some(f64::from_bits(bits))
    }
}

/// Compresses a timestamp column.
///
/// # Arguments
///
/// * `timestamps` - Timestamps in column order; any order round-trips, sorted
///   input compresses best
///
/// # Returns
///
/// The bitstream, padded to whole bytes by `into_vec`.
///
/// # Example
///
/// ```rust
/// use alopex_burrow::series::gorilla::{compress_timestamps, decompress_timestamps};
///
/// let bytes = compress_timestamps([1_000, 2_000, 3_000]).into_vec();
/// assert_eq!(decompress_timestamps(&bytes, 3), Some(vec![1_000, 2_000, 3_000]));
/// ```
pub fn compress_timestamps(timestamps: impl IntoIterator<Item = i64>) -> Bits {
    let mut output = Bits::new();
    let mut encoder = TimestampEncoder::new();
    for ts in timestamps {
        encoder.encode(ts, &mut output);
    }
    output
}

/// Compresses a value column.
pub fn compress_values(values: impl IntoIterator<Item = f64>) -> Bits {
    let mut output = Bits::new();
    let mut encoder = ValueEncoder::new();
    for value in values {
        encoder.encode(value, &mut output);
    }
    output
}

/// Decompresses exactly `count` timestamps from raw bytes.
pub fn decompress_timestamps(bytes: &[u8], count: usize) -> Option<Vec<i64>> {
    let mut decoder = TimestampDecoder::new(BitSlice::<u8, Msb0>::from_slice(bytes));
    (0..count).map(|_| decoder.decode_next()).collect()
}

/// Decompresses exactly `count` values from raw bytes.
pub fn decompress_values(bytes: &[u8], count: usize) -> Option<Vec<f64>> {
    let mut decoder = ValueDecoder::new(BitSlice::<u8, Msb0>::from_slice(bytes));
    (0..count).map(|_| decoder.decode_next()).collect()
}
