use std::net::IpAddr;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use udpd_frame::{ByteOrder, DEFAULT_PAYLOAD_BUDGET};
use udpd_receiver::SequencePolicy;
use udpd_transport::IpMode;

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream frames of generated samples to a receiver.
    Send(SendArgs),
    /// Receive frames and print the latest snapshot periodically.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum ByteOrderArg {
    #[default]
    Big,
    Little,
}

impl From<ByteOrderArg> for ByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Big => ByteOrder::Big,
            ByteOrderArg::Little => ByteOrder::Little,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum IpModeArg {
    #[default]
    Any,
    V4,
    V6,
}

impl From<IpModeArg> for IpMode {
    fn from(arg: IpModeArg) -> Self {
        match arg {
            IpModeArg::Any => IpMode::Any,
            IpModeArg::V4 => IpMode::V4,
            IpModeArg::V6 => IpMode::V6,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum PolicyArg {
    /// Reject every sequence at or below the last accepted one.
    #[default]
    Strict,
    /// Accept a lower sequence as a restart after `--quiet-reset` of silence.
    ResetAfterQuiet,
}

impl From<PolicyArg> for SequencePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Strict => SequencePolicy::StrictIncreasing,
            PolicyArg::ResetAfterQuiet => SequencePolicy::AllowResetAfterQuiet,
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver host name or address.
    #[arg(env = "UDPD_REMOTE_HOST")]
    pub host: String,
    /// Receiver port.
    #[arg(long, short = 'p', env = "UDPD_PORT")]
    pub port: u16,
    /// Local port to send from (0 = ephemeral).
    #[arg(long, default_value = "0", env = "UDPD_LOCAL_PORT")]
    pub local_port: u16,
    /// Samples per frame.
    #[arg(long, default_value = "8")]
    pub samples: usize,
    /// Number of frames to send.
    #[arg(long, default_value = "1")]
    pub frames: u64,
    /// Delay between frames (e.g. 10ms, 1s).
    #[arg(long, default_value = "10ms")]
    pub interval: String,
    /// First sequence number. Default: continue from 0.
    #[arg(long, allow_negative_numbers = true)]
    pub start_sequence: Option<i32>,
    /// Largest datagram to produce, in bytes.
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_BUDGET)]
    pub payload_budget: usize,
    /// Byte order agreed with the receiver.
    #[arg(long, value_enum, default_value_t)]
    pub byte_order: ByteOrderArg,
    /// Address family to resolve the host to.
    #[arg(long, value_enum, default_value_t)]
    pub ip_mode: IpModeArg,
    /// Connect the socket to the receiver.
    #[arg(long)]
    pub connected: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to receive on.
    #[arg(long, short = 'p', env = "UDPD_PORT")]
    pub port: u16,
    /// Local address to bind. Default: all interfaces.
    #[arg(long, env = "UDPD_BIND_ADDR")]
    pub bind: Option<IpAddr>,
    /// Print interval (e.g. 500ms, 1s).
    #[arg(long, default_value = "500ms")]
    pub interval: String,
    /// Exit after printing N snapshots.
    #[arg(long)]
    pub count: Option<usize>,
    /// Skip snapshots older than this (e.g. 200ms). Default: no limit.
    #[arg(long)]
    pub max_age: Option<String>,
    /// Upper bound on samples per frame.
    #[arg(long, default_value = "172")]
    pub max_samples: usize,
    /// Largest expected datagram, in bytes.
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_BUDGET)]
    pub payload_budget: usize,
    /// Byte order agreed with the sender.
    #[arg(long, value_enum, default_value_t)]
    pub byte_order: ByteOrderArg,
    /// Only accept frames from this address.
    #[arg(long)]
    pub allow_addr: Option<IpAddr>,
    /// Only accept frames from this source port.
    #[arg(long)]
    pub allow_port: Option<u16>,
    /// Handling of non-increasing sequence numbers.
    #[arg(long, value_enum, default_value_t)]
    pub policy: PolicyArg,
    /// Silence after which a restarted sequence is accepted (e.g. 1s).
    #[arg(long, default_value = "1s")]
    pub quiet_reset: String,
    /// Per-second frame cap.
    #[arg(long, default_value = "2000", conflicts_with = "no_flood_limit")]
    pub flood_limit: u32,
    /// Disable the per-second frame cap.
    #[arg(long)]
    pub no_flood_limit: bool,
    /// Address family of the bound socket.
    #[arg(long, value_enum, default_value_t)]
    pub ip_mode: IpModeArg,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("  ").is_err());
    }

    #[test]
    fn value_enums_convert() {
        assert_eq!(ByteOrder::from(ByteOrderArg::Little), ByteOrder::Little);
        assert_eq!(
            SequencePolicy::from(PolicyArg::ResetAfterQuiet),
            SequencePolicy::AllowResetAfterQuiet
        );
        assert_eq!(IpMode::from(IpModeArg::V6), IpMode::V6);
    }
}
