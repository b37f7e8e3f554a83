//! Double-buffered latest-frame snapshot.
//!
//! The single writer alternates between two fixed sample buffers and
//! brackets every publish with a generation counter: odd while a publish is
//! in progress, even once it is complete, zero before the first frame.
//! Readers load the generation before and after touching the snapshot and
//! discard the read if it moved or was odd. Samples live in `AtomicU64`
//! slots holding `f64` bits, so an overlapping read is merely stale, never
//! undefined.

use std::fmt;
use std::sync::atomic::{fence, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use udpd_frame::{duration_to_nanos, Frame, MonotonicClock};

use crate::diagnostics::Diagnostics;
use crate::error::ReadError;

/// Metadata of the latest accepted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub sample_count: usize,
    pub sequence: i32,
    /// Producer clock reading carried in the frame.
    pub sender_timestamp_nanos: u64,
    /// Receiver clock reading at arrival, relative to
    /// [`SnapshotReader::clock`].
    pub local_arrival_nanos: u64,
    /// Loss estimate at the time of the read.
    pub cumulative_lost: u64,
}

pub(crate) struct Shared {
    generation: AtomicU64,
    active: AtomicUsize,
    count: AtomicUsize,
    sequence: AtomicI32,
    sender_timestamp: AtomicU64,
    arrival: AtomicU64,
    lost: AtomicU64,
    buffers: [Box<[AtomicU64]>; 2],
    diagnostics: Diagnostics,
    clock: MonotonicClock,
}

fn zeroed(capacity: usize) -> Box<[AtomicU64]> {
    (0..capacity).map(|_| AtomicU64::new(0)).collect()
}

impl Shared {
    pub(crate) fn new(capacity: usize, clock: MonotonicClock) -> Self {
        Self {
            generation: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            sequence: AtomicI32::new(0),
            sender_timestamp: AtomicU64::new(0),
            arrival: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            buffers: [zeroed(capacity), zeroed(capacity)],
            diagnostics: Diagnostics::default(),
            clock,
        }
    }

    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub(crate) fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buffers[0].len()
    }

    /// Publish `frame` as the latest snapshot.
    ///
    /// Must only be called from the single ingestion context, with
    /// `frame.count() <= capacity()`.
    pub(crate) fn publish(&self, frame: &Frame<'_>, arrival_nanos: u64, cumulative_lost: u64) {
        let generation = self.generation.load(Ordering::Relaxed);
        self.generation
            .store(generation.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let target = 1 - self.active.load(Ordering::Relaxed);
        for (slot, value) in self.buffers[target].iter().zip(frame.samples()) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }

        self.active.store(target, Ordering::Relaxed);
        self.count.store(frame.count(), Ordering::Relaxed);
        self.sender_timestamp
            .store(frame.timestamp_nanos(), Ordering::Relaxed);
        self.arrival.store(arrival_nanos, Ordering::Relaxed);
        self.lost.store(cumulative_lost, Ordering::Relaxed);
        self.sequence.store(frame.sequence(), Ordering::Relaxed);

        self.generation
            .store(generation.wrapping_add(2), Ordering::Release);
    }

    /// Run `read` against a consistent view of the snapshot.
    ///
    /// `read` may observe a half-written publish; its result is discarded
    /// in that case and `Contended` returned instead.
    fn consistent<R>(
        &self,
        read: impl FnOnce(usize, SnapshotMeta) -> R,
    ) -> Result<(R, u64), ReadError> {
        let before = self.generation.load(Ordering::Acquire);
        if before == 0 {
            return Err(ReadError::Empty);
        }
        if before & 1 == 1 {
            return Err(ReadError::Contended);
        }

        let active = self.active.load(Ordering::Relaxed);
        let meta = SnapshotMeta {
            sample_count: self.count.load(Ordering::Relaxed),
            sequence: self.sequence.load(Ordering::Relaxed),
            sender_timestamp_nanos: self.sender_timestamp.load(Ordering::Relaxed),
            local_arrival_nanos: self.arrival.load(Ordering::Relaxed),
            cumulative_lost: self.lost.load(Ordering::Relaxed),
        };
        let result = read(active, meta);

        fence(Ordering::Acquire);
        if self.generation.load(Ordering::Relaxed) != before {
            return Err(ReadError::Contended);
        }
        Ok((result, before))
    }

    fn unchanged_since(&self, generation: u64) -> bool {
        fence(Ordering::Acquire);
        self.generation.load(Ordering::Relaxed) == generation
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

fn check_age(meta: &SnapshotMeta, now_nanos: u64, max_age: Duration) -> Result<(), ReadError> {
    if max_age.is_zero() {
        return Ok(());
    }
    let age_nanos = now_nanos.saturating_sub(meta.local_arrival_nanos);
    if age_nanos > duration_to_nanos(max_age) {
        return Err(ReadError::Stale {
            age: Duration::from_nanos(age_nanos),
            max_age,
        });
    }
    Ok(())
}

/// Non-blocking read handle onto a receiver's latest snapshot.
///
/// Cheap to clone; every clone observes the same engine. A `max_age` of
/// zero disables the staleness check.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    shared: Arc<Shared>,
}

impl SnapshotReader {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Borrow the latest frame without copying its samples.
    ///
    /// The returned samples stay intact until the engine publishes twice
    /// more; use [`LatestView::is_current`] after reading them, or
    /// [`copy_latest_into`](Self::copy_latest_into), when that matters.
    pub fn peek_latest(&self, max_age: Duration) -> Result<LatestView<'_>, ReadError> {
        self.peek_latest_at(max_age, Instant::now())
    }

    /// [`peek_latest`](Self::peek_latest) with an explicit "now".
    pub fn peek_latest_at(
        &self,
        max_age: Duration,
        now: Instant,
    ) -> Result<LatestView<'_>, ReadError> {
        let now_nanos = self.shared.clock.nanos_at(now);
        let (checked, generation) = self.shared.consistent(|active, meta| {
            check_age(&meta, now_nanos, max_age).map(|()| (active, meta))
        })?;
        let (active, meta) = checked?;
        Ok(LatestView {
            shared: &self.shared,
            generation,
            meta,
            samples: SampleView {
                slots: &self.shared.buffers[active][..meta.sample_count],
            },
        })
    }

    /// Copy the latest frame's samples into `dst` and return its metadata.
    ///
    /// Checks run in order: empty, destination capacity, staleness, and
    /// finally whether a publish overlapped the copy. `dst` past
    /// `sample_count` is left untouched; on error its contents are
    /// unspecified.
    pub fn copy_latest_into(
        &self,
        dst: &mut [f64],
        max_age: Duration,
    ) -> Result<SnapshotMeta, ReadError> {
        self.copy_latest_into_at(dst, max_age, Instant::now())
    }

    /// [`copy_latest_into`](Self::copy_latest_into) with an explicit "now".
    pub fn copy_latest_into_at(
        &self,
        dst: &mut [f64],
        max_age: Duration,
        now: Instant,
    ) -> Result<SnapshotMeta, ReadError> {
        let now_nanos = self.shared.clock.nanos_at(now);
        let shared = &self.shared;
        let (copied, _) = shared.consistent(|active, meta| {
            if meta.sample_count > dst.len() {
                return Err(ReadError::DestinationTooSmall {
                    needed: meta.sample_count,
                    capacity: dst.len(),
                });
            }
            check_age(&meta, now_nanos, max_age)?;
            for (out, slot) in dst.iter_mut().zip(&shared.buffers[active][..meta.sample_count]) {
                *out = f64::from_bits(slot.load(Ordering::Relaxed));
            }
            Ok(meta)
        })?;
        copied
    }

    /// Whether any frame has been accepted.
    pub fn has_data(&self) -> bool {
        self.shared.generation.load(Ordering::Acquire) != 0
    }

    /// Capacity of the sample buffers.
    pub fn max_samples(&self) -> usize {
        self.shared.capacity()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.shared.diagnostics
    }

    /// Clock the arrival timestamps are relative to.
    pub fn clock(&self) -> &MonotonicClock {
        &self.shared.clock
    }
}

/// Zero-copy view of the latest frame.
#[derive(Debug, Clone, Copy)]
pub struct LatestView<'a> {
    shared: &'a Shared,
    generation: u64,
    meta: SnapshotMeta,
    samples: SampleView<'a>,
}

impl<'a> LatestView<'a> {
    pub fn meta(&self) -> SnapshotMeta {
        self.meta
    }

    pub fn samples(&self) -> SampleView<'a> {
        self.samples
    }

    /// Whether no publish has happened since this view was taken, meaning
    /// every sample read through it so far belongs to this frame.
    pub fn is_current(&self) -> bool {
        self.shared.unchanged_since(self.generation)
    }
}

/// Borrowed sample storage of one snapshot.
#[derive(Clone, Copy)]
pub struct SampleView<'a> {
    slots: &'a [AtomicU64],
}

impl SampleView<'_> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.slots
            .get(index)
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.slots
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
    }

    /// Copy into the front of `dst`, returning the number copied.
    pub fn copy_to(&self, dst: &mut [f64]) -> usize {
        let mut copied = 0;
        for (out, value) in dst.iter_mut().zip(self.iter()) {
            *out = value;
            copied += 1;
        }
        copied
    }
}

impl fmt::Debug for SampleView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use udpd_frame::{decode_frame, encode_frame, wire_size, ByteOrder};

    use super::*;

    fn publish(shared: &Shared, samples: &[f64], sequence: i32, arrival_nanos: u64, lost: u64) {
        let mut buf = vec![0u8; wire_size(samples.len())];
        encode_frame(samples, sequence, 77, ByteOrder::Big, &mut buf).unwrap();
        let frame = decode_frame(&buf, shared.capacity(), ByteOrder::Big).unwrap();
        shared.publish(&frame, arrival_nanos, lost);
    }

    fn setup(capacity: usize) -> (Arc<Shared>, SnapshotReader) {
        let shared = Arc::new(Shared::new(capacity, MonotonicClock::new()));
        let reader = SnapshotReader::new(Arc::clone(&shared));
        (shared, reader)
    }

    #[test]
    fn empty_before_first_publish() {
        let (_shared, reader) = setup(4);
        assert!(!reader.has_data());
        assert_eq!(
            reader.peek_latest(Duration::ZERO).unwrap_err(),
            ReadError::Empty
        );
        let mut dst = [0.0; 4];
        assert_eq!(
            reader.copy_latest_into(&mut dst, Duration::ZERO).unwrap_err(),
            ReadError::Empty
        );
    }

    #[test]
    fn peek_returns_latest_frame() {
        let (shared, reader) = setup(4);
        publish(&shared, &[1.0, 2.0], 10, 0, 0);
        publish(&shared, &[3.0, 4.0, 5.0], 11, 0, 2);

        let view = reader.peek_latest(Duration::ZERO).unwrap();
        assert_eq!(
            view.meta(),
            SnapshotMeta {
                sample_count: 3,
                sequence: 11,
                sender_timestamp_nanos: 77,
                local_arrival_nanos: 0,
                cumulative_lost: 2,
            }
        );
        assert_eq!(view.samples().iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        assert_eq!(view.samples().get(3), None);
        assert!(view.is_current());
    }

    #[test]
    fn view_notices_later_publish() {
        let (shared, reader) = setup(2);
        publish(&shared, &[1.0], 1, 0, 0);
        let view = reader.peek_latest(Duration::ZERO).unwrap();
        publish(&shared, &[2.0], 2, 0, 0);
        assert!(!view.is_current());
        // Ping-pong buffering keeps the first frame intact for one publish.
        assert_eq!(view.samples().get(0), Some(1.0));
    }

    #[test]
    fn copy_into_rejects_small_destination() {
        let (shared, reader) = setup(4);
        publish(&shared, &[1.0, 2.0, 3.0], 1, 0, 0);

        let mut small = [0.0; 2];
        assert_eq!(
            reader.copy_latest_into(&mut small, Duration::ZERO).unwrap_err(),
            ReadError::DestinationTooSmall {
                needed: 3,
                capacity: 2
            }
        );

        let mut dst = [9.0; 5];
        let meta = reader.copy_latest_into(&mut dst, Duration::ZERO).unwrap();
        assert_eq!(meta.sample_count, 3);
        assert_eq!(dst, [1.0, 2.0, 3.0, 9.0, 9.0]);
    }

    #[test]
    fn staleness_gate() {
        let (shared, reader) = setup(1);
        let origin = reader.clock().origin();
        publish(&shared, &[1.0], 1, 1_000_000, 0);

        let fresh = origin + Duration::from_millis(11);
        let stale = origin + Duration::from_millis(12);
        let max_age = Duration::from_millis(10);

        assert!(reader.peek_latest_at(max_age, fresh).is_ok());
        assert_eq!(
            reader.peek_latest_at(max_age, stale).unwrap_err(),
            ReadError::Stale {
                age: Duration::from_millis(11),
                max_age
            }
        );
        let mut dst = [0.0; 1];
        assert!(matches!(
            reader.copy_latest_into_at(&mut dst, max_age, stale),
            Err(ReadError::Stale { .. })
        ));
        // Zero disables the gate.
        assert!(reader
            .peek_latest_at(Duration::ZERO, origin + Duration::from_secs(3600))
            .is_ok());
    }

    #[test]
    fn concurrent_reads_never_tear() {
        const CAPACITY: usize = 16;
        const FRAMES: i32 = 20_000;

        let (shared, reader) = setup(CAPACITY);
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = reader.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut dst = [0.0; CAPACITY];
                    let mut consistent = 0u64;
                    while !done.load(Ordering::Acquire) {
                        match reader.copy_latest_into(&mut dst, Duration::ZERO) {
                            Ok(meta) => {
                                let expected_count = (meta.sequence as usize % CAPACITY) + 1;
                                assert_eq!(meta.sample_count, expected_count);
                                for &value in &dst[..meta.sample_count] {
                                    assert_eq!(value, f64::from(meta.sequence));
                                }
                                consistent += 1;
                            }
                            Err(ReadError::Empty | ReadError::Contended) => {}
                            Err(other) => panic!("unexpected read error: {other}"),
                        }
                    }
                    consistent
                })
            })
            .collect();

        let mut samples = [0.0; CAPACITY];
        for sequence in 0..FRAMES {
            let count = (sequence as usize % CAPACITY) + 1;
            samples[..count].fill(f64::from(sequence));
            publish(&shared, &samples[..count], sequence, 0, 0);
        }
        done.store(true, Ordering::Release);

        for handle in readers {
            handle.join().unwrap();
        }
        let meta = reader.copy_latest_into(&mut [0.0; CAPACITY], Duration::ZERO).unwrap();
        assert_eq!(meta.sequence, FRAMES - 1);
    }
}
