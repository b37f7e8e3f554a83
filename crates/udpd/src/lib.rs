//! Low-latency UDP sample streaming.
//!
//! A sender packs bounded arrays of `f64` samples into fixed-layout UDP
//! frames; a receiver validates them, applies sequence and sender policy,
//! and publishes the latest frame to any number of lock-free readers.
//!
//! # Crate Structure
//!
//! - [`transport`]: datagram transport abstraction (UDP, in-memory)
//! - [`frame`]: wire codec and sequenced sender
//! - [`receiver`]: ingestion engine, snapshot readers and diagnostics
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use udpd::frame::SenderFramer;
//! use udpd::receiver::{ReceiverConfig, ReceiverWorker};
//! use udpd::transport::{UdpConfig, UdpTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let receiver = UdpTransport::bind(&UdpConfig::receiver(9870))?;
//! let worker = ReceiverWorker::spawn(receiver, ReceiverConfig::default())?;
//! let reader = worker.reader();
//!
//! let sender = SenderFramer::new(UdpTransport::bind(&UdpConfig::sender("127.0.0.1", 9870))?);
//! sender.send(&[0.1, 0.2, 0.3])?;
//!
//! let mut latest = [0.0; 172];
//! if let Ok(meta) = reader.copy_latest_into(&mut latest, Duration::from_millis(50)) {
//!     println!("seq {} -> {:?}", meta.sequence, &latest[..meta.sample_count]);
//! }
//! worker.stop()?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use udpd_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use udpd_frame::*;
}

/// Re-export receiver types.
pub mod receiver {
    pub use udpd_receiver::*;
}
