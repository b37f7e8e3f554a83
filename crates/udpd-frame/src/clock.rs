use std::time::{Duration, Instant};

/// Monotonic nanosecond clock anchored at construction.
///
/// Readings are offsets from the anchor, so they are never negative and fit
/// the unsigned wire timestamp for roughly 584 years of uptime.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant that reads as zero.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Nanoseconds since the anchor.
    pub fn now_nanos(&self) -> u64 {
        self.nanos_at(Instant::now())
    }

    /// Nanoseconds from the anchor to `at`, saturating at zero for instants
    /// taken before the anchor.
    pub fn nanos_at(&self, at: Instant) -> u64 {
        duration_to_nanos(at.saturating_duration_since(self.origin))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Duration as whole nanoseconds, saturating at `u64::MAX`.
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
