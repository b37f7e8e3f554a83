use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use udpd_receiver::{FloodLimit, ReadError, ReceiverConfig, ReceiverWorker, SenderFilter};
use udpd_transport::{UdpConfig, UdpTransport};

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{receiver_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_snapshot, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let max_age = args
        .max_age
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .unwrap_or(Duration::ZERO);
    let config = receiver_config(&args)?;

    let transport_config = UdpConfig {
        bind_addr: args.bind,
        ..UdpConfig::receiver(args.port)
    }
    .with_ip_mode(args.ip_mode.into());
    let transport =
        UdpTransport::bind(&transport_config).map_err(|err| transport_error("bind failed", err))?;
    info!(local_addr = %transport.local_addr(), "listening");

    let worker =
        ReceiverWorker::spawn(transport, config).map_err(|err| receiver_error("listen", err))?;
    let reader = worker.reader();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut latest = vec![0.0; reader.max_samples()];
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) && worker.is_running() {
        match reader.copy_latest_into(&mut latest, max_age) {
            Ok(meta) => {
                print_snapshot(
                    &meta,
                    &latest[..meta.sample_count],
                    reader.diagnostics().snapshot(),
                    format,
                );
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(ReadError::Empty | ReadError::Stale { .. } | ReadError::Contended) => {}
            Err(err @ ReadError::DestinationTooSmall { .. }) => {
                return Err(CliError::new(INTERNAL, format!("read failed: {err}")));
            }
        }
        thread::sleep(interval);
    }

    debug!(printed, "stopping receiver");
    worker
        .stop()
        .map_err(|err| receiver_error("receive failed", err))?;
    Ok(SUCCESS)
}

fn receiver_config(args: &ListenArgs) -> CliResult<ReceiverConfig> {
    let sender_filter = (args.allow_addr.is_some() || args.allow_port.is_some()).then_some(
        SenderFilter {
            address: args.allow_addr,
            port: args.allow_port,
        },
    );
    let flood_limit = (!args.no_flood_limit).then_some(FloodLimit {
        max_per_second: args.flood_limit,
    });

    Ok(ReceiverConfig {
        requested_max_samples: args.max_samples,
        payload_budget_bytes: args.payload_budget,
        byte_order: args.byte_order.into(),
        sender_filter,
        sequence_policy: args.policy.into(),
        quiet_reset_threshold: parse_duration(&args.quiet_reset)?,
        flood_limit,
        ..ReceiverConfig::default()
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
