//! Receive side of udpd.
//!
//! One ingestion context feeds raw datagrams to a [`ReceiverEngine`], which
//! applies flood, sender, format and sequence policy and publishes each
//! accepted frame into a double-buffered snapshot. Any number of
//! [`SnapshotReader`]s sample the latest frame without locks, blocking or
//! allocation; a read that overlaps a publish reports
//! [`ReadError::Contended`] instead of returning torn data.
//!
//! [`ReceiverWorker`] runs the ingestion loop on a dedicated thread over any
//! [`udpd_transport::DatagramTransport`].

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod policy;
pub mod snapshot;
pub mod worker;

pub use config::{FloodLimit, ReceiverConfig, SenderFilter, SequencePolicy};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use engine::{IngestOutcome, ReceiverEngine};
pub use error::{ConfigError, PolicyReject, ReadError, ReceiverError, Rejection, Result};
pub use snapshot::{LatestView, SampleView, SnapshotMeta, SnapshotReader};
pub use worker::ReceiverWorker;
