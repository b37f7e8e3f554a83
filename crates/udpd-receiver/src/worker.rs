use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use udpd_transport::{DatagramTransport, Received, TransportError};

use crate::config::ReceiverConfig;
use crate::engine::ReceiverEngine;
use crate::error::{ReceiverError, Result};
use crate::snapshot::SnapshotReader;

const THREAD_NAME: &str = "udpd-ingest";

/// Owns the ingestion thread of one receiver.
///
/// The thread blocks on the transport for at most the configured receive
/// timeout at a time, so [`stop`](Self::stop) returns within roughly one
/// timeout. After `stop` returns no further publish happens. Dropping the
/// worker stops it the same way.
pub struct ReceiverWorker {
    reader: SnapshotReader,
    transport: Arc<dyn DatagramTransport>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ReceiverWorker {
    /// Validate `config` and start ingesting from `transport`.
    pub fn spawn<T>(transport: T, config: ReceiverConfig) -> Result<Self>
    where
        T: DatagramTransport + 'static,
    {
        let engine = ReceiverEngine::new(config)?;
        let reader = engine.reader();
        let transport: Arc<dyn DatagramTransport> = Arc::new(transport);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let transport = Arc::clone(&transport);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || ingest_loop(transport.as_ref(), engine, &stop))
                .map_err(ReceiverError::Spawn)?
        };

        Ok(Self {
            reader,
            transport,
            stop,
            handle: Some(handle),
        })
    }

    /// A read handle onto the latest snapshot; remains usable after stop.
    pub fn reader(&self) -> SnapshotReader {
        self.reader.clone()
    }

    /// Whether the ingestion thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop ingestion and wait for the thread to exit.
    ///
    /// Returns the fatal error that ended the loop early, if any.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);
        self.transport.close();
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(ReceiverError::WorkerPanicked),
        }
    }
}

impl Drop for ReceiverWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "receiver worker ended with error");
        }
    }
}

impl std::fmt::Debug for ReceiverWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverWorker")
            .field("transport", &self.transport.transport_name())
            .field("running", &self.is_running())
            .finish()
    }
}

fn ingest_loop(
    transport: &dyn DatagramTransport,
    mut engine: ReceiverEngine,
    stop: &AtomicBool,
) -> Result<()> {
    let mut buf = vec![0u8; engine.receive_buffer_len()];
    let timeout = engine.config().receive_timeout;
    let mut health = engine
        .config()
        .health_log_interval
        .map(|interval| HealthLog::new(engine.reader(), interval, engine.config().stale_warning));

    info!(
        transport = transport.transport_name(),
        max_samples = engine.max_samples(),
        "ingestion started"
    );

    while !stop.load(Ordering::Acquire) {
        match transport.receive(&mut buf, timeout) {
            Ok(Received::Datagram { len, source }) => {
                engine.ingest(&buf[..len], source);
            }
            Ok(Received::TimedOut) => {}
            Err(TransportError::Closed) if stop.load(Ordering::Acquire) => break,
            Err(err) => {
                error!(error = %err, "ingestion stopped by transport failure");
                return Err(err.into());
            }
        }

        if let Some(health) = health.as_mut() {
            health.maybe_log(Instant::now());
        }
    }

    debug!("ingestion stopped");
    Ok(())
}

/// Periodic summary of receiver counters, plus a warning when the latest
/// frame is older than the stale threshold.
struct HealthLog {
    reader: SnapshotReader,
    interval: Duration,
    stale_warning: Duration,
    next: Instant,
}

impl HealthLog {
    fn new(reader: SnapshotReader, interval: Duration, stale_warning: Duration) -> Self {
        Self {
            reader,
            interval,
            stale_warning,
            next: Instant::now() + interval,
        }
    }

    fn maybe_log(&mut self, now: Instant) {
        if now < self.next {
            return;
        }
        self.next = now + self.interval;

        let counters = self.reader.diagnostics().snapshot();
        let latest = self.reader.peek_latest_at(Duration::ZERO, now).ok().map(|view| {
            let meta = view.meta();
            let now_nanos = self.reader.clock().nanos_at(now);
            let age = Duration::from_nanos(now_nanos.saturating_sub(meta.local_arrival_nanos));
            (meta, age)
        });

        info!(
            accepted = counters.accepted,
            invalid = counters.invalid,
            rejected_by_filter = counters.rejected_by_filter,
            late_or_duplicate = counters.late_or_duplicate,
            estimated_lost = counters.estimated_lost,
            flood_limited = counters.flood_limited,
            sequence = latest.map(|(meta, _)| meta.sequence),
            count = latest.map(|(meta, _)| meta.sample_count),
            age_ms = latest.map(|(_, age)| age.as_millis() as u64),
            "receiver health"
        );

        if let Some((meta, age)) = latest {
            if age > self.stale_warning {
                warn!(
                    age_ms = age.as_millis() as u64,
                    sequence = meta.sequence,
                    "latest frame is stale"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use udpd_frame::{encode_frame, wire_size, ByteOrder, SenderFramer};
    use udpd_transport::{MemoryTransport, UdpConfig, UdpTransport};

    use super::*;
    use crate::error::ConfigError;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn config() -> ReceiverConfig {
        ReceiverConfig {
            receive_timeout: Duration::from_millis(10),
            ..ReceiverConfig::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn ingests_injected_frames() {
        let (transport, injector) = MemoryTransport::new(addr(9000));
        let worker = ReceiverWorker::spawn(transport, config()).unwrap();
        let reader = worker.reader();

        for sequence in 1..=3 {
            let mut buf = vec![0u8; wire_size(2)];
            encode_frame(&[f64::from(sequence), 0.0], sequence, 0, ByteOrder::Big, &mut buf)
                .unwrap();
            injector.inject(&buf, addr(9001)).unwrap();
        }

        assert!(wait_for(|| reader.diagnostics().accepted() == 3));
        let view = reader.peek_latest(Duration::ZERO).unwrap();
        assert_eq!(view.meta().sequence, 3);
        assert_eq!(view.samples().get(0), Some(3.0));

        assert!(worker.is_running());
        worker.stop().unwrap();
        // Reader outlives the worker.
        assert!(reader.has_data());
    }

    #[test]
    fn garbage_does_not_stop_ingestion() {
        let (transport, injector) = MemoryTransport::new(addr(9000));
        let worker = ReceiverWorker::spawn(transport, config()).unwrap();
        let reader = worker.reader();

        injector.inject(b"not a frame", addr(9001)).unwrap();
        assert!(wait_for(|| reader.diagnostics().invalid() == 1));
        assert!(worker.is_running());
        worker.stop().unwrap();
    }

    #[test]
    fn transport_failure_ends_the_loop() {
        let (transport, injector) = MemoryTransport::new(addr(9000));
        let worker = ReceiverWorker::spawn(transport, config()).unwrap();
        drop(injector);

        assert!(wait_for(|| !worker.is_running()));
        assert!(matches!(
            worker.stop(),
            Err(ReceiverError::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn invalid_config_is_reported_before_spawning() {
        let (transport, _injector) = MemoryTransport::new(addr(9000));
        let err = ReceiverWorker::spawn(
            transport,
            ReceiverConfig {
                receive_timeout: Duration::ZERO,
                ..ReceiverConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Config(ConfigError::ZeroReceiveTimeout)
        ));
    }

    #[test]
    fn sender_to_receiver_over_loopback() {
        let receiver = UdpTransport::bind(&UdpConfig {
            bind_addr: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..UdpConfig::receiver(0)
        })
        .unwrap();
        let port = receiver.local_addr().port();
        let worker = ReceiverWorker::spawn(receiver, config()).unwrap();
        let reader = worker.reader();

        let sender = SenderFramer::new(UdpTransport::bind(&UdpConfig::sender("127.0.0.1", port)).unwrap());
        let samples: Vec<f64> = (0..sender.max_samples()).map(|i| i as f64 * 0.25).collect();

        // Loopback rarely drops, but keep sending until something lands.
        assert!(wait_for(|| {
            sender.send(&samples).unwrap();
            reader.has_data()
        }));

        let mut dst = vec![0.0; reader.max_samples()];
        let meta = reader.copy_latest_into(&mut dst, Duration::ZERO).unwrap();
        assert_eq!(meta.sample_count, samples.len());
        assert_eq!(dst, samples);
        worker.stop().unwrap();
    }

    #[test]
    fn health_log_tracks_interval() {
        let engine = ReceiverEngine::new(ReceiverConfig::default()).unwrap();
        let start = Instant::now();
        let mut health = HealthLog::new(engine.reader(), Duration::from_millis(100), Duration::from_millis(10));

        health.maybe_log(start);
        let scheduled = health.next;
        health.maybe_log(scheduled + Duration::from_millis(1));
        assert_eq!(health.next, scheduled + Duration::from_millis(101));
    }
}
