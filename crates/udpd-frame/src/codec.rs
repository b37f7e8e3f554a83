use bytes::{Buf, BufMut};

use crate::error::{DecodeError, EncodeError};

/// Header: magic (4) + version (2) + count (2) + sequence (4) + timestamp (8).
pub const HEADER_SIZE: usize = 20;

/// Bytes per sample on the wire.
pub const SAMPLE_SIZE: usize = 8;

/// Magic: "UDPD".
pub const MAGIC: u32 = 0x5544_5044;

/// The only supported protocol version.
pub const VERSION: u16 = 1;

/// Default payload budget, small enough to avoid IP fragmentation on
/// standard Ethernet.
pub const DEFAULT_PAYLOAD_BUDGET: usize = 1400;

/// Upper bound imposed by the 16-bit count field.
pub const MAX_WIRE_SAMPLES: usize = u16::MAX as usize;

/// Byte order of every multi-byte field in a frame.
///
/// Not carried on the wire; both peers must be configured alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network order.
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    fn get_u16(self, src: &mut &[u8]) -> u16 {
        match self {
            ByteOrder::Big => src.get_u16(),
            ByteOrder::Little => src.get_u16_le(),
        }
    }

    fn get_u32(self, src: &mut &[u8]) -> u32 {
        match self {
            ByteOrder::Big => src.get_u32(),
            ByteOrder::Little => src.get_u32_le(),
        }
    }

    fn get_i32(self, src: &mut &[u8]) -> i32 {
        match self {
            ByteOrder::Big => src.get_i32(),
            ByteOrder::Little => src.get_i32_le(),
        }
    }

    fn get_u64(self, src: &mut &[u8]) -> u64 {
        match self {
            ByteOrder::Big => src.get_u64(),
            ByteOrder::Little => src.get_u64_le(),
        }
    }

    fn get_f64(self, src: &mut &[u8]) -> f64 {
        match self {
            ByteOrder::Big => src.get_f64(),
            ByteOrder::Little => src.get_f64_le(),
        }
    }

    fn put_u16(self, dst: &mut &mut [u8], value: u16) {
        match self {
            ByteOrder::Big => dst.put_u16(value),
            ByteOrder::Little => dst.put_u16_le(value),
        }
    }

    fn put_u32(self, dst: &mut &mut [u8], value: u32) {
        match self {
            ByteOrder::Big => dst.put_u32(value),
            ByteOrder::Little => dst.put_u32_le(value),
        }
    }

    fn put_i32(self, dst: &mut &mut [u8], value: i32) {
        match self {
            ByteOrder::Big => dst.put_i32(value),
            ByteOrder::Little => dst.put_i32_le(value),
        }
    }

    fn put_u64(self, dst: &mut &mut [u8], value: u64) {
        match self {
            ByteOrder::Big => dst.put_u64(value),
            ByteOrder::Little => dst.put_u64_le(value),
        }
    }

    fn put_f64(self, dst: &mut &mut [u8], value: f64) {
        match self {
            ByteOrder::Big => dst.put_f64(value),
            ByteOrder::Little => dst.put_f64_le(value),
        }
    }
}

/// Largest sample count whose frame fits in `payload_budget` bytes.
///
/// Budgets smaller than a header yield zero.
pub fn max_samples_for_budget(payload_budget: usize) -> usize {
    payload_budget.saturating_sub(HEADER_SIZE) / SAMPLE_SIZE
}

/// Per-stream frame capacity, fixed for the lifetime of a sender or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    max_samples: usize,
}

impl FrameLimits {
    /// The smaller of `requested_max_samples`, what fits in `payload_budget`,
    /// and what the count field can express.
    pub fn new(requested_max_samples: usize, payload_budget: usize) -> Self {
        let max_samples = requested_max_samples
            .min(max_samples_for_budget(payload_budget))
            .min(MAX_WIRE_SAMPLES);
        Self { max_samples }
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Wire size of the largest frame allowed by these limits.
    pub fn max_frame_size(&self) -> usize {
        wire_size(self.max_samples)
    }
}

/// Wire size of a frame carrying `count` samples.
pub fn wire_size(count: usize) -> usize {
    HEADER_SIZE + count * SAMPLE_SIZE
}

/// Decoded frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of samples, `1..=max_samples`.
    pub count: u16,
    /// Producer-assigned sequence number.
    pub sequence: i32,
    /// Producer monotonic clock reading.
    pub timestamp_nanos: u64,
}

/// A validated frame borrowing its samples from the datagram.
///
/// Samples are decoded on access, so holding a `Frame` costs nothing beyond
/// the borrow.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    header: FrameHeader,
    order: ByteOrder,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn header(&self) -> FrameHeader {
        self.header
    }

    pub fn count(&self) -> usize {
        usize::from(self.header.count)
    }

    pub fn sequence(&self) -> i32 {
        self.header.sequence
    }

    pub fn timestamp_nanos(&self) -> u64 {
        self.header.timestamp_nanos
    }

    /// Sample at `index`, if within `count`.
    pub fn sample(&self, index: usize) -> Option<f64> {
        let start = index.checked_mul(SAMPLE_SIZE)?;
        let end = start.checked_add(SAMPLE_SIZE)?;
        let mut chunk = self.payload.get(start..end)?;
        Some(self.order.get_f64(&mut chunk))
    }

    /// Iterate the samples in order.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = f64> + 'a {
        let order = self.order;
        self.payload.chunks_exact(SAMPLE_SIZE).map(move |mut chunk| order.get_f64(&mut chunk))
    }

    /// Decode every sample into `dst`, returning the count written.
    ///
    /// `dst` shorter than `count` receives only the first `dst.len()` samples.
    pub fn decode_samples_into(&self, dst: &mut [f64]) -> usize {
        let mut written = 0;
        for (slot, value) in dst.iter_mut().zip(self.samples()) {
            *slot = value;
            written += 1;
        }
        written
    }

    /// Total bytes this frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the front of `dst`, returning the bytes written.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬───────────┬────────────┬──────────────┬─────────────────┐
/// │ Magic (4B) │ Version   │ Count     │ Sequence   │ Timestamp    │ Samples         │
/// │ "UDPD"     │ (2B) = 1  │ (2B)      │ (4B, i32)  │ (8B, u64 ns) │ (8B f64 × count)│
/// └────────────┴───────────┴───────────┴────────────┴──────────────┴─────────────────┘
/// ```
///
/// Capacity limits (`count <= max_samples`) are the caller's to enforce; this
/// only rejects what cannot be written at all.
pub fn encode_frame(
    samples: &[f64],
    sequence: i32,
    timestamp_nanos: u64,
    order: ByteOrder,
    dst: &mut [u8],
) -> Result<usize, EncodeError> {
    let count = u16::try_from(samples.len()).map_err(|_| EncodeError::TooManySamples {
        count: samples.len(),
    })?;
    let needed = wire_size(samples.len());
    if dst.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            capacity: dst.len(),
        });
    }

    let mut cursor = &mut dst[..needed];
    order.put_u32(&mut cursor, MAGIC);
    order.put_u16(&mut cursor, VERSION);
    order.put_u16(&mut cursor, count);
    order.put_i32(&mut cursor, sequence);
    order.put_u64(&mut cursor, timestamp_nanos);
    for &sample in samples {
        order.put_f64(&mut cursor, sample);
    }

    Ok(needed)
}

/// Validate and decode one datagram.
///
/// Bytes past the announced samples are ignored. Nothing outside the returned
/// frame is touched, so a failed decode leaves no trace.
pub fn decode_frame(
    src: &[u8],
    max_samples: usize,
    order: ByteOrder,
) -> Result<Frame<'_>, DecodeError> {
    if src.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort { len: src.len() });
    }

    let mut cursor = src;
    let magic = order.get_u32(&mut cursor);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }

    let version = order.get_u16(&mut cursor);
    if version != VERSION {
        return Err(DecodeError::BadVersion { found: version });
    }

    let count = order.get_u16(&mut cursor);
    if count == 0 || usize::from(count) > max_samples {
        return Err(DecodeError::CountOutOfRange {
            count,
            max: max_samples,
        });
    }

    let sequence = order.get_i32(&mut cursor);
    let timestamp_nanos = order.get_u64(&mut cursor);

    let needed = usize::from(count) * SAMPLE_SIZE;
    if cursor.len() < needed {
        return Err(DecodeError::Truncated {
            count,
            needed,
            available: cursor.len(),
        });
    }

    Ok(Frame {
        header: FrameHeader {
            count,
            sequence,
            timestamp_nanos,
        },
        order,
        payload: &cursor[..needed],
    })
}
