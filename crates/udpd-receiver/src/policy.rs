use std::time::Duration;

use udpd_frame::duration_to_nanos;

use crate::config::SequencePolicy;
use crate::error::PolicyReject;

const WINDOW_NANOS: u64 = 1_000_000_000;

/// Fixed one-second admission window.
///
/// The first datagram opens a window; a datagram arriving a full second or
/// more after the window start opens the next one. Every datagram counts
/// toward its window whether or not it is admitted.
#[derive(Debug)]
pub(crate) struct FloodGate {
    max_per_window: u32,
    window_start: Option<u64>,
    seen: u32,
}

impl FloodGate {
    pub(crate) fn new(max_per_second: u32) -> Self {
        Self {
            max_per_window: max_per_second,
            window_start: None,
            seen: 0,
        }
    }

    pub(crate) fn admit(&mut self, arrival_nanos: u64) -> bool {
        match self.window_start {
            Some(start) if arrival_nanos.saturating_sub(start) < WINDOW_NANOS => {}
            _ => {
                self.window_start = Some(arrival_nanos);
                self.seen = 0;
            }
        }
        self.seen = self.seen.saturating_add(1);
        self.seen <= self.max_per_window
    }
}

/// Sequence policy outcome for an acceptable frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Verdict {
    /// Frames missing between the previous and this sequence.
    pub lost: u64,
    /// Accepted as a stream restart.
    pub reset: bool,
}

/// Last accepted `(sequence, arrival_nanos)`.
#[derive(Debug, Default)]
pub(crate) struct SequenceTracker {
    last: Option<(i32, u64)>,
}

impl SequenceTracker {
    pub(crate) fn evaluate(
        &self,
        sequence: i32,
        arrival_nanos: u64,
        policy: SequencePolicy,
        quiet_threshold: Duration,
    ) -> Result<Verdict, PolicyReject> {
        let Some((previous, previous_arrival)) = self.last else {
            return Ok(Verdict {
                lost: 0,
                reset: false,
            });
        };

        if sequence > previous {
            let gap = i64::from(sequence) - i64::from(previous);
            return Ok(Verdict {
                lost: (gap - 1) as u64,
                reset: false,
            });
        }

        let quiet = arrival_nanos.saturating_sub(previous_arrival);
        match policy {
            SequencePolicy::AllowResetAfterQuiet if quiet >= duration_to_nanos(quiet_threshold) => {
                Ok(Verdict {
                    lost: 0,
                    reset: true,
                })
            }
            _ if sequence == previous => Err(PolicyReject::Duplicate),
            _ => Err(PolicyReject::OutOfOrder),
        }
    }

    pub(crate) fn record(&mut self, sequence: i32, arrival_nanos: u64) {
        self.last = Some((sequence, arrival_nanos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn strict(tracker: &SequenceTracker, sequence: i32) -> Result<Verdict, PolicyReject> {
        tracker.evaluate(sequence, 0, SequencePolicy::StrictIncreasing, Duration::ZERO)
    }

    #[test]
    fn first_frame_always_accepted() {
        let tracker = SequenceTracker::default();
        assert_eq!(
            strict(&tracker, -40),
            Ok(Verdict {
                lost: 0,
                reset: false
            })
        );
    }

    #[test]
    fn gap_counts_missing_frames() {
        let mut tracker = SequenceTracker::default();
        tracker.record(2, 0);
        assert_eq!(strict(&tracker, 3).unwrap().lost, 0);
        assert_eq!(strict(&tracker, 5).unwrap().lost, 2);
    }

    #[test]
    fn extreme_gap_does_not_overflow() {
        let mut tracker = SequenceTracker::default();
        tracker.record(i32::MIN, 0);
        assert_eq!(strict(&tracker, i32::MAX).unwrap().lost, u32::MAX as u64 - 1);
    }

    #[test]
    fn strict_rejects_equal_and_lower() {
        let mut tracker = SequenceTracker::default();
        tracker.record(5, 0);
        assert_eq!(strict(&tracker, 5), Err(PolicyReject::Duplicate));
        assert_eq!(strict(&tracker, 3), Err(PolicyReject::OutOfOrder));
    }

    #[test]
    fn reset_requires_quiet_period() {
        let mut tracker = SequenceTracker::default();
        tracker.record(5, 100 * MS);
        let policy = SequencePolicy::AllowResetAfterQuiet;
        let threshold = Duration::from_millis(50);

        assert_eq!(
            tracker.evaluate(1, 120 * MS, policy, threshold),
            Err(PolicyReject::OutOfOrder)
        );
        assert_eq!(
            tracker.evaluate(5, 149 * MS, policy, threshold),
            Err(PolicyReject::Duplicate)
        );
        assert_eq!(
            tracker.evaluate(1, 150 * MS, policy, threshold),
            Ok(Verdict {
                lost: 0,
                reset: true
            })
        );
    }

    #[test]
    fn flood_gate_caps_each_window() {
        let mut gate = FloodGate::new(2);
        assert!(gate.admit(0));
        assert!(gate.admit(10 * MS));
        assert!(!gate.admit(20 * MS));
        assert!(!gate.admit(999 * MS));
        // New window opens at the first arrival a full second after the start.
        assert!(gate.admit(1000 * MS));
        assert!(gate.admit(1500 * MS));
        assert!(!gate.admit(1999 * MS));
    }

    #[test]
    fn flood_gate_first_window_starts_at_first_arrival() {
        let mut gate = FloodGate::new(1);
        assert!(gate.admit(5000 * MS));
        assert!(!gate.admit(5999 * MS));
        assert!(gate.admit(6000 * MS));
    }
}
