use udpd_transport::TransportError;

/// Why an inbound datagram is not a valid frame.
///
/// Checks run in declaration order; the first failing one is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than a frame header.
    #[error("datagram too short ({len} bytes, header is 20)")]
    TooShort { len: usize },

    /// The header does not start with the protocol magic.
    #[error("invalid frame magic 0x{found:08x} (expected 0x55445044 \"UDPD\")")]
    BadMagic { found: u32 },

    /// Unsupported protocol version.
    #[error("unsupported frame version {found}")]
    BadVersion { found: u16 },

    /// Sample count is zero or exceeds the receiver's capacity.
    #[error("sample count {count} out of range (1..={max})")]
    CountOutOfRange { count: u16, max: usize },

    /// The header announces more samples than the datagram carries.
    #[error("frame truncated ({count} samples need {needed} bytes, {available} available)")]
    Truncated {
        count: u16,
        needed: usize,
        available: usize,
    },
}

/// Errors from writing a frame into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// More samples than the 16-bit count field can describe.
    #[error("{count} samples do not fit the frame count field")]
    TooManySamples { count: usize },

    /// Destination buffer cannot hold the frame.
    #[error("buffer too small ({capacity} bytes, frame needs {needed})")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Errors surfaced by [`crate::SenderFramer`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The underlying transport is closed.
    #[error("sender transport is not open")]
    NotOpen,

    /// More samples than the sender's frame capacity.
    #[error("payload too large ({count} samples, max {max})")]
    PayloadTooLarge { count: usize, max: usize },

    /// The transport reported a send failure.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] TransportError),
}

impl From<TransportError> for SendError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => SendError::NotOpen,
            other => SendError::TransportFailure(other),
        }
    }
}

impl From<EncodeError> for SendError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::TooManySamples { count } => SendError::PayloadTooLarge {
                count,
                max: crate::codec::MAX_WIRE_SAMPLES,
            },
            EncodeError::BufferTooSmall { needed, capacity } => SendError::PayloadTooLarge {
                count: needed.saturating_sub(crate::codec::HEADER_SIZE) / crate::codec::SAMPLE_SIZE,
                max: capacity.saturating_sub(crate::codec::HEADER_SIZE) / crate::codec::SAMPLE_SIZE,
            },
        }
    }
}

pub type Result<T, E = SendError> = std::result::Result<T, E>;
