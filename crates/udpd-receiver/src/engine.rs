use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use udpd_frame::{decode_frame, FrameLimits, MonotonicClock};

use crate::config::ReceiverConfig;
use crate::error::{ConfigError, PolicyReject, Rejection};
use crate::policy::{FloodGate, SequenceTracker};
use crate::snapshot::{Shared, SnapshotReader};

/// Result of ingesting one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted {
        sequence: i32,
        /// Frames inferred missing just before this one.
        lost: u64,
        /// Accepted as a stream restart after a quiet period.
        reset: bool,
    },
    Rejected(Rejection),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Single-writer half of the receiver.
///
/// `ingest` takes `&mut self`, so exactly one context can publish. Readers
/// obtained through [`reader`](Self::reader) run concurrently and never
/// block it.
#[derive(Debug)]
pub struct ReceiverEngine {
    config: ReceiverConfig,
    limits: FrameLimits,
    shared: Arc<Shared>,
    flood_gate: Option<FloodGate>,
    tracker: SequenceTracker,
}

impl ReceiverEngine {
    pub fn new(config: ReceiverConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, MonotonicClock::new())
    }

    /// Engine whose arrival timestamps are relative to `clock`.
    pub fn with_clock(config: ReceiverConfig, clock: MonotonicClock) -> Result<Self, ConfigError> {
        let limits = config.validate()?;
        debug!(
            max_samples = limits.max_samples(),
            byte_order = ?config.byte_order,
            policy = ?config.sequence_policy,
            "receiver engine ready"
        );
        Ok(Self {
            flood_gate: config.flood_limit.map(|limit| FloodGate::new(limit.max_per_second)),
            shared: Arc::new(Shared::new(limits.max_samples(), clock)),
            tracker: SequenceTracker::default(),
            limits,
            config,
        })
    }

    /// A new read handle onto this engine's snapshot.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(Arc::clone(&self.shared))
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn max_samples(&self) -> usize {
        self.limits.max_samples()
    }

    /// Receive buffer size that holds any acceptable datagram, with one
    /// spare byte so oversized datagrams are not silently cut to fit.
    pub fn receive_buffer_len(&self) -> usize {
        self.config
            .payload_budget_bytes
            .max(self.limits.max_frame_size())
            + 1
    }

    /// Ingest one datagram arriving now.
    pub fn ingest(&mut self, bytes: &[u8], source: SocketAddr) -> IngestOutcome {
        self.ingest_at(bytes, source, Instant::now())
    }

    /// Ingest one datagram that arrived at `arrival`.
    ///
    /// Never fails: every problem with the datagram is reported as a
    /// rejection and counted, and leaves the published snapshot untouched.
    pub fn ingest_at(&mut self, bytes: &[u8], source: SocketAddr, arrival: Instant) -> IngestOutcome {
        let arrival_nanos = self.shared.clock().nanos_at(arrival);
        let diagnostics = self.shared.diagnostics();

        if let Some(gate) = self.flood_gate.as_mut() {
            if !gate.admit(arrival_nanos) {
                diagnostics.record_flood_limited();
                debug!(%source, "flood limited");
                return IngestOutcome::Rejected(PolicyReject::FloodLimited.into());
            }
        }

        if let Some(filter) = &self.config.sender_filter {
            if !filter.matches(&source) {
                diagnostics.record_filtered();
                debug!(%source, "sender not allowed");
                return IngestOutcome::Rejected(PolicyReject::SenderNotAllowed.into());
            }
        }

        let frame = match decode_frame(bytes, self.limits.max_samples(), self.config.byte_order) {
            Ok(frame) => frame,
            Err(err) => {
                diagnostics.record_invalid();
                debug!(%source, len = bytes.len(), error = %err, "invalid frame");
                return IngestOutcome::Rejected(err.into());
            }
        };

        let sequence = frame.sequence();
        let verdict = match self.tracker.evaluate(
            sequence,
            arrival_nanos,
            self.config.sequence_policy,
            self.config.quiet_reset_threshold,
        ) {
            Ok(verdict) => verdict,
            Err(reject) => {
                diagnostics.record_late_or_duplicate();
                debug!(sequence, reason = %reject, "sequence rejected");
                return IngestOutcome::Rejected(reject.into());
            }
        };

        let cumulative_lost = if verdict.lost > 0 {
            debug!(sequence, lost = verdict.lost, "sequence gap");
            diagnostics.add_lost(verdict.lost)
        } else {
            diagnostics.estimated_lost()
        };
        if verdict.reset {
            debug!(sequence, "stream restart accepted after quiet period");
        }

        self.shared.publish(&frame, arrival_nanos, cumulative_lost);
        self.tracker.record(sequence, arrival_nanos);
        diagnostics.record_accepted();

        IngestOutcome::Accepted {
            sequence,
            lost: verdict.lost,
            reset: verdict.reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use udpd_frame::{encode_frame, wire_size, ByteOrder, DecodeError};

    use super::*;
    use crate::config::{FloodLimit, SenderFilter, SequencePolicy};
    use crate::error::ReadError;
    use crate::DiagnosticsSnapshot;

    fn source() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn frame(samples: &[f64], sequence: i32) -> Vec<u8> {
        let mut buf = vec![0u8; wire_size(samples.len())];
        encode_frame(samples, sequence, 1234, ByteOrder::Big, &mut buf).unwrap();
        buf
    }

    fn engine(config: ReceiverConfig) -> ReceiverEngine {
        ReceiverEngine::new(config).unwrap()
    }

    fn latest_sequence(reader: &SnapshotReader) -> i32 {
        reader.peek_latest(Duration::ZERO).unwrap().meta().sequence
    }

    #[test]
    fn accepted_frame_is_published() {
        let mut engine = engine(ReceiverConfig::default());
        let reader = engine.reader();

        let outcome = engine.ingest(&frame(&[0.5, -1.5, 2.25], 7), source());
        assert_eq!(
            outcome,
            IngestOutcome::Accepted {
                sequence: 7,
                lost: 0,
                reset: false
            }
        );

        let mut dst = [0.0; 8];
        let meta = reader.copy_latest_into(&mut dst, Duration::ZERO).unwrap();
        assert_eq!(meta.sample_count, 3);
        assert_eq!(meta.sequence, 7);
        assert_eq!(meta.sender_timestamp_nanos, 1234);
        assert_eq!(&dst[..3], &[0.5, -1.5, 2.25]);
        assert_eq!(reader.diagnostics().accepted(), 1);
    }

    #[test]
    fn sequence_gap_accumulates_loss() {
        let mut engine = engine(ReceiverConfig::default());
        let reader = engine.reader();

        for sequence in [1, 2, 5] {
            assert!(engine.ingest(&frame(&[1.0], sequence), source()).is_accepted());
        }

        let meta = reader.peek_latest(Duration::ZERO).unwrap().meta();
        assert_eq!(meta.sequence, 5);
        assert_eq!(meta.cumulative_lost, 2);
        assert_eq!(reader.diagnostics().estimated_lost(), 2);
    }

    #[test]
    fn late_frame_leaves_snapshot_alone() {
        let mut engine = engine(ReceiverConfig::default());
        let reader = engine.reader();

        engine.ingest(&frame(&[5.0], 5), source());
        assert_eq!(
            engine.ingest(&frame(&[3.0], 3), source()),
            IngestOutcome::Rejected(PolicyReject::OutOfOrder.into())
        );
        assert_eq!(
            engine.ingest(&frame(&[5.5], 5), source()),
            IngestOutcome::Rejected(PolicyReject::Duplicate.into())
        );

        let view = reader.peek_latest(Duration::ZERO).unwrap();
        assert_eq!(view.meta().sequence, 5);
        assert_eq!(view.samples().get(0), Some(5.0));
        assert_eq!(reader.diagnostics().late_or_duplicate(), 2);
    }

    #[test]
    fn restart_accepted_after_quiet_period() {
        let mut engine = engine(ReceiverConfig {
            sequence_policy: SequencePolicy::AllowResetAfterQuiet,
            quiet_reset_threshold: Duration::from_millis(100),
            ..ReceiverConfig::default()
        });
        let reader = engine.reader();
        let start = reader.clock().origin();

        engine.ingest_at(&frame(&[1.0], 5), source(), start);
        assert!(!engine
            .ingest_at(&frame(&[1.0], 1), source(), start + Duration::from_millis(50))
            .is_accepted());
        assert_eq!(
            engine.ingest_at(&frame(&[1.0], 1), source(), start + Duration::from_millis(100)),
            IngestOutcome::Accepted {
                sequence: 1,
                lost: 0,
                reset: true
            }
        );
        assert_eq!(latest_sequence(&reader), 1);
    }

    #[test]
    fn invalid_frames_are_counted() {
        let mut engine = engine(ReceiverConfig {
            requested_max_samples: 4,
            ..ReceiverConfig::default()
        });
        let reader = engine.reader();

        let empty = frame(&[], 1);
        assert_eq!(
            engine.ingest(&empty, source()),
            IngestOutcome::Rejected(Rejection::Invalid(DecodeError::CountOutOfRange {
                count: 0,
                max: 4
            }))
        );
        assert!(!engine.ingest(&frame(&[0.0; 5], 2), source()).is_accepted());
        assert!(!engine.ingest(&[0u8; 3], source()).is_accepted());
        assert_eq!(reader.diagnostics().invalid(), 3);
        assert_eq!(reader.peek_latest(Duration::ZERO).unwrap_err(), ReadError::Empty);

        assert!(engine.ingest(&frame(&[0.0; 4], 3), source()).is_accepted());
        assert_eq!(reader.peek_latest(Duration::ZERO).unwrap().meta().sample_count, 4);
    }

    #[test]
    fn filtered_sender_is_rejected() {
        let allowed = source();
        let mut engine = engine(ReceiverConfig {
            sender_filter: Some(SenderFilter::exact(allowed)),
            ..ReceiverConfig::default()
        });
        let reader = engine.reader();

        let stranger = SocketAddr::from(([127, 0, 0, 1], 40001));
        assert_eq!(
            engine.ingest(&frame(&[1.0], 1), stranger),
            IngestOutcome::Rejected(PolicyReject::SenderNotAllowed.into())
        );
        assert!(engine.ingest(&frame(&[1.0], 1), allowed).is_accepted());
        assert_eq!(reader.diagnostics().rejected_by_filter(), 1);
    }

    #[test]
    fn flood_limit_drops_excess_without_touching_state() {
        let mut engine = engine(ReceiverConfig {
            flood_limit: Some(FloodLimit { max_per_second: 2 }),
            ..ReceiverConfig::default()
        });
        let reader = engine.reader();
        let start = reader.clock().origin();

        assert!(engine.ingest_at(&frame(&[1.0], 1), source(), start).is_accepted());
        assert!(engine.ingest_at(&frame(&[2.0], 2), source(), start).is_accepted());
        assert_eq!(
            engine.ingest_at(&frame(&[3.0], 3), source(), start),
            IngestOutcome::Rejected(PolicyReject::FloodLimited.into())
        );
        // Garbage is flood limited too, not counted as invalid.
        assert!(!engine.ingest_at(&[0u8; 2], source(), start).is_accepted());

        assert_eq!(latest_sequence(&reader), 2);
        assert_eq!(
            reader.diagnostics().snapshot(),
            DiagnosticsSnapshot {
                accepted: 2,
                flood_limited: 2,
                ..DiagnosticsSnapshot::default()
            }
        );

        let next_window = start + Duration::from_secs(1);
        assert!(engine.ingest_at(&frame(&[4.0], 4), source(), next_window).is_accepted());
        assert_eq!(reader.diagnostics().estimated_lost(), 1);
    }

    #[test]
    fn little_endian_deployment() {
        let mut engine = engine(ReceiverConfig {
            byte_order: ByteOrder::Little,
            ..ReceiverConfig::default()
        });
        let mut buf = vec![0u8; wire_size(1)];
        encode_frame(&[42.0], 9, 0, ByteOrder::Little, &mut buf).unwrap();
        assert!(engine.ingest(&buf, source()).is_accepted());
        assert!(!engine.ingest(&frame(&[42.0], 10), source()).is_accepted());
    }

    #[test]
    fn receive_buffer_exceeds_largest_frame() {
        let engine = engine(ReceiverConfig::default());
        assert_eq!(engine.max_samples(), 172);
        assert!(engine.receive_buffer_len() > wire_size(172));
    }
}
