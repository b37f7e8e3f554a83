use std::sync::atomic::{AtomicU64, Ordering};

/// Per-engine counters. Monotonically increasing; only re-creating the
/// engine resets them.
///
/// Written by the ingestion context, readable from anywhere.
#[derive(Debug, Default)]
pub struct Diagnostics {
    accepted: AtomicU64,
    invalid: AtomicU64,
    rejected_by_filter: AtomicU64,
    late_or_duplicate: AtomicU64,
    estimated_lost: AtomicU64,
    flood_limited: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`]. Each counter is loaded
/// individually, so the set is not an atomic snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub accepted: u64,
    pub invalid: u64,
    pub rejected_by_filter: u64,
    pub late_or_duplicate: u64,
    pub estimated_lost: u64,
    pub flood_limited: u64,
}

impl Diagnostics {
    /// Frames published.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Datagrams that failed to decode.
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Datagrams from senders outside the allow-list.
    pub fn rejected_by_filter(&self) -> u64 {
        self.rejected_by_filter.load(Ordering::Relaxed)
    }

    /// Frames dropped by the sequence policy.
    pub fn late_or_duplicate(&self) -> u64 {
        self.late_or_duplicate.load(Ordering::Relaxed)
    }

    /// Frames inferred missing from sequence gaps.
    pub fn estimated_lost(&self) -> u64 {
        self.estimated_lost.load(Ordering::Relaxed)
    }

    /// Datagrams dropped by the flood gate.
    pub fn flood_limited(&self) -> u64 {
        self.flood_limited.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            accepted: self.accepted(),
            invalid: self.invalid(),
            rejected_by_filter: self.rejected_by_filter(),
            late_or_duplicate: self.late_or_duplicate(),
            estimated_lost: self.estimated_lost(),
            flood_limited: self.flood_limited(),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.rejected_by_filter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late_or_duplicate(&self) {
        self.late_or_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flood_limited(&self) {
        self.flood_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `frames` to the loss estimate, returning the new total.
    pub(crate) fn add_lost(&self, frames: u64) -> u64 {
        self.estimated_lost.fetch_add(frames, Ordering::Relaxed) + frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(
            Diagnostics::default().snapshot(),
            DiagnosticsSnapshot::default()
        );
    }

    #[test]
    fn counters_are_independent() {
        let diagnostics = Diagnostics::default();
        diagnostics.record_accepted();
        diagnostics.record_accepted();
        diagnostics.record_invalid();
        diagnostics.record_filtered();
        diagnostics.record_late_or_duplicate();
        diagnostics.record_flood_limited();
        assert_eq!(diagnostics.add_lost(3), 3);
        assert_eq!(diagnostics.add_lost(2), 5);

        assert_eq!(
            diagnostics.snapshot(),
            DiagnosticsSnapshot {
                accepted: 2,
                invalid: 1,
                rejected_by_filter: 1,
                late_or_duplicate: 1,
                estimated_lost: 5,
                flood_limited: 1,
            }
        );
    }
}
