use std::thread;
use std::time::Instant;

use tracing::{info, warn};
use udpd_frame::{SendError, SenderConfig, SenderFramer};
use udpd_transport::{SocketMode, UdpConfig, UdpTransport};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{send_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_send_summary, OutputFormat, SendSummary};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    if args.samples == 0 {
        return Err(CliError::usage("--samples must be at least 1"));
    }

    let mode = if args.connected {
        SocketMode::Connected
    } else {
        SocketMode::Unconnected
    };
    let transport_config = UdpConfig::sender(args.host.clone(), args.port)
        .with_local_port(args.local_port)
        .with_mode(mode)
        .with_ip_mode(args.ip_mode.into());
    let transport =
        UdpTransport::bind(&transport_config).map_err(|err| transport_error("bind failed", err))?;
    let destination = transport
        .peer_addr()
        .map_or_else(|| format!("{}:{}", args.host, args.port), |addr| addr.to_string());

    let sender = SenderFramer::with_config(
        transport,
        SenderConfig {
            payload_budget_bytes: args.payload_budget,
            byte_order: args.byte_order.into(),
            ..SenderConfig::default()
        },
    );
    if args.samples > sender.max_samples() {
        return Err(CliError::usage(format!(
            "--samples {} exceeds the {} that fit in a {}-byte payload",
            args.samples,
            sender.max_samples(),
            args.payload_budget
        )));
    }
    if let Some(start) = args.start_sequence {
        sender.set_next_sequence(start);
    }

    info!(%destination, frames = args.frames, samples = args.samples, ?interval, "sending");

    let mut summary = SendSummary {
        destination,
        frames_sent: 0,
        frames_failed: 0,
        bytes_sent: 0,
        samples_per_frame: args.samples,
        next_sequence: sender.next_sequence(),
    };
    let mut samples = vec![0.0; args.samples];
    let mut next_tick = Instant::now();

    for frame_index in 0..args.frames {
        fill_waveform(&mut samples, frame_index);
        match sender.send(&samples) {
            Ok(bytes) => {
                summary.frames_sent += 1;
                summary.bytes_sent += bytes as u64;
            }
            // Datagrams are fire-and-forget; a refused or dropped one is
            // counted and the stream carries on.
            Err(SendError::TransportFailure(err)) => {
                warn!(error = %err, frame_index, "send failed");
                summary.frames_failed += 1;
            }
            Err(err) => return Err(send_error("send failed", err)),
        }

        if frame_index + 1 < args.frames {
            next_tick += interval;
            sleep_until(next_tick);
        }
    }

    summary.next_sequence = sender.next_sequence();
    print_send_summary(&summary, format);
    Ok(SUCCESS)
}

/// Slow sine sweep so consecutive frames are distinguishable.
fn fill_waveform(samples: &mut [f64], frame_index: u64) {
    let len = samples.len() as f64;
    for (i, slot) in samples.iter_mut().enumerate() {
        let phase = frame_index as f64 * 0.05 + i as f64 / len;
        *slot = (phase * std::f64::consts::TAU).sin();
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn waveform_stays_in_unit_range() {
        let mut samples = [0.0; 16];
        for frame in 0..50 {
            fill_waveform(&mut samples, frame);
            assert!(samples.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn waveform_changes_between_frames() {
        let mut first = [0.0; 4];
        let mut second = [0.0; 4];
        fill_waveform(&mut first, 0);
        fill_waveform(&mut second, 1);
        assert_ne!(first, second);
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let start = Instant::now();
        sleep_until(start.checked_sub(Duration::from_millis(5)).unwrap_or(start));
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
