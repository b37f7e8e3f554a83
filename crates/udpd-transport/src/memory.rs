use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::traits::{DatagramTransport, Received};

type Datagram = (Vec<u8>, SocketAddr);

/// In-process datagram transport.
///
/// Datagrams are queued in an unbounded channel, so nothing is ever lost
/// unless the receiving side has been dropped. Each endpoint has a fake local
/// address which is reported as the source of everything it transmits.
pub struct MemoryTransport {
    local_addr: SocketAddr,
    inbox: Mutex<Receiver<Datagram>>,
    outbox: Option<Sender<Datagram>>,
    closed: AtomicBool,
}

/// Handle that pushes datagrams into a [`MemoryTransport`] from any source
/// address.
#[derive(Clone)]
pub struct MemoryInjector {
    tx: Sender<Datagram>,
}

impl MemoryInjector {
    /// Queue one datagram as if it arrived from `source`.
    pub fn inject(&self, bytes: &[u8], source: SocketAddr) -> Result<()> {
        self.tx
            .send((bytes.to_vec(), source))
            .map_err(|_| TransportError::Closed)
    }
}

impl MemoryTransport {
    /// A receive-only endpoint plus an injector feeding it.
    pub fn new(local_addr: SocketAddr) -> (Self, MemoryInjector) {
        let (tx, rx) = mpsc::channel();
        let transport = Self {
            local_addr,
            inbox: Mutex::new(rx),
            outbox: None,
            closed: AtomicBool::new(false),
        };
        (transport, MemoryInjector { tx })
    }

    /// Two endpoints wired to each other.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        let left = Self {
            local_addr: a,
            inbox: Mutex::new(a_rx),
            outbox: Some(b_tx),
            closed: AtomicBool::new(false),
        };
        let right = Self {
            local_addr: b,
            inbox: Mutex::new(b_rx),
            outbox: Some(a_tx),
            closed: AtomicBool::new(false),
        };
        (left, right)
    }

    /// The fake local address of this endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl DatagramTransport for MemoryTransport {
    fn transmit(&self, bytes: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let outbox = self.outbox.as_ref().ok_or(TransportError::NoDestination)?;
        outbox
            .send((bytes.to_vec(), self.local_addr))
            .map_err(|_| TransportError::Io(std::io::ErrorKind::BrokenPipe.into()))?;
        Ok(bytes.len())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let inbox = self
            .inbox
            .lock()
            .map_err(|_| TransportError::Io(std::io::Error::other("inbox lock poisoned")))?;
        match inbox.recv_timeout(timeout) {
            Ok((bytes, source)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(Received::Datagram { len, source })
            }
            Err(RecvTimeoutError::Timeout) => Ok(Received::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
