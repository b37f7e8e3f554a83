use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};
use udpd_transport::DatagramTransport;

use crate::clock::MonotonicClock;
use crate::codec::{encode_frame, ByteOrder, FrameLimits, DEFAULT_PAYLOAD_BUDGET, MAX_WIRE_SAMPLES};
use crate::error::{Result, SendError};

/// Configuration for a [`SenderFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Upper bound on samples per frame requested by the application.
    /// Further capped by `payload_budget_bytes`.
    pub requested_max_samples: usize,
    /// Maximum datagram size in bytes. Default: 1400.
    pub payload_budget_bytes: usize,
    /// Byte order shared with the receiver. Default: big-endian.
    pub byte_order: ByteOrder,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            requested_max_samples: MAX_WIRE_SAMPLES,
            payload_budget_bytes: DEFAULT_PAYLOAD_BUDGET,
            byte_order: ByteOrder::Big,
        }
    }
}

struct SenderState {
    buf: Vec<u8>,
    next_sequence: i32,
}

/// Composes sample frames and hands them to a transport.
///
/// One scratch buffer and one auto-increment sequence counter are shared by
/// all calls; compose-and-transmit runs under a lock so concurrent callers
/// each get a whole frame and a distinct sequence number. Independent streams
/// need independent framers.
///
/// Sends are fire-and-forget: no retry, no acknowledgement.
pub struct SenderFramer<T> {
    transport: T,
    limits: FrameLimits,
    order: ByteOrder,
    clock: MonotonicClock,
    state: Mutex<SenderState>,
}

impl<T: DatagramTransport> SenderFramer<T> {
    /// Create a framer with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SenderConfig::default())
    }

    /// Create a framer with explicit configuration.
    pub fn with_config(transport: T, config: SenderConfig) -> Self {
        let limits = FrameLimits::new(config.requested_max_samples, config.payload_budget_bytes);
        debug!(
            max_samples = limits.max_samples(),
            transport = transport.transport_name(),
            "sender framer ready"
        );
        Self {
            transport,
            limits,
            order: config.byte_order,
            clock: MonotonicClock::new(),
            state: Mutex::new(SenderState {
                buf: vec![0u8; limits.max_frame_size()],
                next_sequence: 0,
            }),
        }
    }

    /// Send `samples` with the next auto-assigned sequence number and the
    /// current monotonic timestamp. Returns the bytes handed to the transport.
    ///
    /// The counter advances once the frame has been composed, whether or not
    /// the transport accepts it. An empty slice sends nothing and returns 0.
    pub fn send(&self, samples: &[f64]) -> Result<usize> {
        self.send_inner(samples, None, None)
    }

    /// Send `samples` with an explicit sequence number and an optional
    /// timestamp (`None` reads the monotonic clock).
    ///
    /// Does not touch the auto-increment counter.
    pub fn send_with(
        &self,
        samples: &[f64],
        sequence: i32,
        timestamp_nanos: Option<u64>,
    ) -> Result<usize> {
        self.send_inner(samples, Some(sequence), timestamp_nanos)
    }

    fn send_inner(
        &self,
        samples: &[f64],
        sequence: Option<i32>,
        timestamp_nanos: Option<u64>,
    ) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let max = self.limits.max_samples();
        if samples.len() > max {
            return Err(SendError::PayloadTooLarge {
                count: samples.len(),
                max,
            });
        }
        if !self.transport.is_open() {
            return Err(SendError::NotOpen);
        }

        let mut state = self.lock_state();
        let sequence = sequence.unwrap_or_else(|| {
            let current = state.next_sequence;
            state.next_sequence = current.wrapping_add(1);
            current
        });
        let timestamp_nanos = timestamp_nanos.unwrap_or_else(|| self.clock.now_nanos());

        let len = encode_frame(samples, sequence, timestamp_nanos, self.order, &mut state.buf)?;
        match self.transport.transmit(&state.buf[..len]) {
            Ok(sent) => {
                trace!(sequence, count = samples.len(), sent, "frame sent");
                Ok(sent)
            }
            Err(err) => {
                debug!(sequence, error = %err, "frame send failed");
                Err(err.into())
            }
        }
    }

    /// Sequence number the next auto-sequenced send will use.
    pub fn next_sequence(&self) -> i32 {
        self.lock_state().next_sequence
    }

    /// Overwrite the auto-increment counter.
    pub fn set_next_sequence(&self, sequence: i32) {
        self.lock_state().next_sequence = sequence;
    }

    /// Restart the auto-increment counter at zero.
    pub fn reset_sequence(&self) {
        self.set_next_sequence(0);
    }

    /// Largest sample count this framer will send.
    pub fn max_samples(&self) -> usize {
        self.limits.max_samples()
    }

    /// Byte order used for every frame.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// The clock used for default timestamps.
    pub fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Close the underlying transport; later sends fail with `NotOpen`.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Consume the framer and return the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    // The guarded state is a byte buffer and a counter, both valid after any
    // panic, so a poisoned lock is recovered rather than propagated.
    fn lock_state(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for SenderFramer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderFramer")
            .field("max_samples", &self.limits.max_samples())
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
