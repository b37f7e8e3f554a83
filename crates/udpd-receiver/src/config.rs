use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use udpd_frame::{ByteOrder, FrameLimits, DEFAULT_PAYLOAD_BUDGET};

use crate::error::ConfigError;

/// Default requested sample capacity: what a 1400-byte budget holds.
pub const DEFAULT_MAX_SAMPLES: usize = 172;

/// How a sequence number at or below the last accepted one is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Always reject.
    #[default]
    StrictIncreasing,
    /// Accept as a stream restart once the stream has been quiet for at
    /// least the configured threshold; reject otherwise.
    AllowResetAfterQuiet,
}

/// Allow-list for inbound datagrams. An absent part matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderFilter {
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
}

impl SenderFilter {
    /// Only accept datagrams from `addr` (address and port).
    pub fn exact(addr: SocketAddr) -> Self {
        Self {
            address: Some(addr.ip()),
            port: Some(addr.port()),
        }
    }

    /// Whether `source` passes the filter. IPv4-mapped IPv6 addresses
    /// compare equal to their IPv4 form.
    pub fn matches(&self, source: &SocketAddr) -> bool {
        let address_ok = self
            .address
            .is_none_or(|allowed| allowed.to_canonical() == source.ip().to_canonical());
        let port_ok = self.port.is_none_or(|allowed| allowed == source.port());
        address_ok && port_ok
    }
}

/// Per-second cap on datagrams admitted for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodLimit {
    pub max_per_second: u32,
}

/// Receiver configuration, validated once by
/// [`ReceiverEngine::new`](crate::ReceiverEngine::new) and immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Upper bound on samples per frame. Default: 172.
    pub requested_max_samples: usize,
    /// Largest expected datagram in bytes; caps the sample capacity and
    /// sizes the receive buffer. Default: 1400.
    pub payload_budget_bytes: usize,
    /// Byte order shared with the sender. Default: big-endian.
    pub byte_order: ByteOrder,
    /// Optional allow-list. Default: accept any sender.
    pub sender_filter: Option<SenderFilter>,
    /// Upper bound on one blocking receive. Default: 100 ms.
    pub receive_timeout: Duration,
    /// Treatment of non-increasing sequence numbers.
    pub sequence_policy: SequencePolicy,
    /// Quiet period after which `AllowResetAfterQuiet` accepts a restart.
    pub quiet_reset_threshold: Duration,
    /// Optional flood protection. Default: disabled.
    pub flood_limit: Option<FloodLimit>,
    /// Interval of the worker's health log line. `None` disables it.
    pub health_log_interval: Option<Duration>,
    /// Snapshot age beyond which the health log warns.
    pub stale_warning: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            requested_max_samples: DEFAULT_MAX_SAMPLES,
            payload_budget_bytes: DEFAULT_PAYLOAD_BUDGET,
            byte_order: ByteOrder::Big,
            sender_filter: None,
            receive_timeout: Duration::from_millis(100),
            sequence_policy: SequencePolicy::StrictIncreasing,
            quiet_reset_threshold: Duration::ZERO,
            flood_limit: None,
            health_log_interval: Some(Duration::from_secs(2)),
            stale_warning: Duration::from_millis(200),
        }
    }
}

impl ReceiverConfig {
    /// Check the configuration and derive the frame capacity.
    pub fn validate(&self) -> Result<FrameLimits, ConfigError> {
        let limits = FrameLimits::new(self.requested_max_samples, self.payload_budget_bytes);
        if limits.max_samples() == 0 {
            return Err(ConfigError::NoSampleCapacity {
                requested: self.requested_max_samples,
                payload_budget: self.payload_budget_bytes,
            });
        }
        if self.receive_timeout.is_zero() {
            return Err(ConfigError::ZeroReceiveTimeout);
        }
        if matches!(self.flood_limit, Some(FloodLimit { max_per_second: 0 })) {
            return Err(ConfigError::ZeroFloodLimit);
        }
        Ok(limits)
    }
}
