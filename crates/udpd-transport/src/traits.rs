use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

/// Outcome of a single bounded receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A datagram of `len` bytes was written to the front of the buffer.
    Datagram { len: usize, source: SocketAddr },
    /// No datagram arrived before the timeout elapsed.
    TimedOut,
}

/// A datagram endpoint bound to a single peer relationship.
///
/// Implementations own their destination: `transmit` always targets the peer
/// chosen at setup time (connected or not). `receive` must never block longer
/// than `timeout`, so a caller can poll a shutdown flag between calls.
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to the configured peer.
    fn transmit(&self, bytes: &[u8]) -> Result<usize>;

    /// Receive one datagram into `buf`, waiting at most `timeout`.
    ///
    /// Datagrams larger than `buf` are truncated to `buf.len()`.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received>;

    /// Whether the transport can still send and receive.
    fn is_open(&self) -> bool;

    /// Close the transport. Subsequent operations return `TransportError::Closed`.
    fn close(&self);

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for std::sync::Arc<T> {
    fn transmit(&self, bytes: &[u8]) -> Result<usize> {
        (**self).transmit(bytes)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        (**self).receive(buf, timeout)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&self) {
        (**self).close()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
