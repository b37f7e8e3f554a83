use std::time::Duration;

use udpd_frame::DecodeError;
use udpd_transport::TransportError;

/// Invalid receiver configuration, reported at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Requested maximum and payload budget leave room for no samples.
    #[error("no sample capacity (requested max {requested}, payload budget {payload_budget} bytes)")]
    NoSampleCapacity {
        requested: usize,
        payload_budget: usize,
    },

    /// A zero receive timeout would block the ingestion loop indefinitely.
    #[error("receive timeout must be greater than zero")]
    ZeroReceiveTimeout,

    /// Flood protection enabled with a cap of zero frames per second.
    #[error("flood limit must allow at least one frame per second")]
    ZeroFloodLimit,
}

/// Policy decisions that drop a well-formed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyReject {
    /// Sequence equal to the last accepted one.
    #[error("duplicate sequence")]
    Duplicate,

    /// Sequence lower than the last accepted one.
    #[error("sequence out of order")]
    OutOfOrder,

    /// Source address or port not on the allow-list.
    #[error("sender not allowed")]
    SenderNotAllowed,

    /// More frames than the per-second cap.
    #[error("flood limit exceeded")]
    FloodLimited,
}

/// Why a datagram was not published. Never fatal to the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("invalid frame: {0}")]
    Invalid(#[from] DecodeError),

    #[error("rejected by policy: {0}")]
    Policy(#[from] PolicyReject),
}

/// Why a read produced no data this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Nothing has been accepted yet.
    #[error("no frame accepted yet")]
    Empty,

    /// The latest frame is older than the caller's limit.
    #[error("latest frame is stale ({age:?} old, limit {max_age:?})")]
    Stale { age: Duration, max_age: Duration },

    /// A publish overlapped the read; retry next cycle.
    #[error("snapshot changed during read")]
    Contended,

    /// Caller storage cannot hold the latest frame.
    #[error("destination too small ({capacity} slots, frame has {needed})")]
    DestinationTooSmall { needed: usize, capacity: usize },
}

/// Fatal receiver conditions surfaced to the owner.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The transport failed while receiving.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The ingestion thread could not be started.
    #[error("failed to spawn ingestion thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The ingestion thread panicked.
    #[error("ingestion thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, ReceiverError>;
