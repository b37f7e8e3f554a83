//! Sample-frame wire format and sender for udpd.
//!
//! Every datagram carries one frame:
//! - a 20-byte header (magic "UDPD", version, sample count, sequence,
//!   sender timestamp)
//! - `count` IEEE-754 doubles
//!
//! All multi-byte fields use one [`ByteOrder`], big-endian unless both peers
//! agree otherwise. The codec never allocates; [`SenderFramer`] owns the one
//! scratch buffer a stream needs.

pub mod clock;
pub mod codec;
pub mod error;
pub mod sender;

pub use clock::{duration_to_nanos, MonotonicClock};
pub use codec::{
    decode_frame, encode_frame, max_samples_for_budget, wire_size, ByteOrder, Frame,
    FrameHeader, FrameLimits, DEFAULT_PAYLOAD_BUDGET, HEADER_SIZE, MAGIC, MAX_WIRE_SAMPLES,
    SAMPLE_SIZE, VERSION,
};
pub use error::{DecodeError, EncodeError, Result, SendError};
pub use sender::{SenderConfig, SenderFramer};
