//! Datagram transport abstraction for udpd.
//!
//! The framing and publish core never touches sockets directly. It is handed
//! a [`DatagramTransport`] that can transmit one datagram to a fixed peer and
//! receive one datagram with a bounded timeout. This crate provides:
//! - [`UdpTransport`], a `std::net::UdpSocket` with address resolution,
//!   bind/connect modes and optional OS-level tuning
//! - [`MemoryTransport`], an in-process pair for tests and simulations
//!
//! Everything platform specific (socket options, name resolution) lives here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use memory::{MemoryInjector, MemoryTransport};
pub use traits::{DatagramTransport, Received};
pub use udp::{IpMode, SocketMode, SocketTuning, UdpConfig, UdpTransport};
