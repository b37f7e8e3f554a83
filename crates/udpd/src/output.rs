use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use udpd_receiver::{DiagnosticsSnapshot, SnapshotMeta};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CountersOutput {
    accepted: u64,
    invalid: u64,
    rejected_by_filter: u64,
    late_or_duplicate: u64,
    estimated_lost: u64,
    flood_limited: u64,
}

impl From<DiagnosticsSnapshot> for CountersOutput {
    fn from(d: DiagnosticsSnapshot) -> Self {
        Self {
            accepted: d.accepted,
            invalid: d.invalid,
            rejected_by_filter: d.rejected_by_filter,
            late_or_duplicate: d.late_or_duplicate,
            estimated_lost: d.estimated_lost,
            flood_limited: d.flood_limited,
        }
    }
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    sequence: i32,
    sample_count: usize,
    sender_timestamp_nanos: u64,
    local_arrival_nanos: u64,
    cumulative_lost: u64,
    samples: &'a [f64],
    diagnostics: CountersOutput,
}

/// Print one snapshot read by `listen`.
pub fn print_snapshot(
    meta: &SnapshotMeta,
    samples: &[f64],
    diagnostics: DiagnosticsSnapshot,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = SnapshotOutput {
                sequence: meta.sequence,
                sample_count: meta.sample_count,
                sender_timestamp_nanos: meta.sender_timestamp_nanos,
                local_arrival_nanos: meta.local_arrival_nanos,
                cumulative_lost: meta.cumulative_lost,
                samples,
                diagnostics: diagnostics.into(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "COUNT", "LOST", "ACCEPTED", "LATE", "INVALID", "SAMPLES"])
                .add_row(vec![
                    meta.sequence.to_string(),
                    meta.sample_count.to_string(),
                    meta.cumulative_lost.to_string(),
                    diagnostics.accepted.to_string(),
                    diagnostics.late_or_duplicate.to_string(),
                    diagnostics.invalid.to_string(),
                    sample_preview(samples),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "seq={} count={} lost={} accepted={} late={} invalid={} samples={}",
                meta.sequence,
                meta.sample_count,
                meta.cumulative_lost,
                diagnostics.accepted,
                diagnostics.late_or_duplicate,
                diagnostics.invalid,
                sample_preview(samples)
            );
        }
    }
}

#[derive(Serialize)]
pub struct SendSummary {
    pub destination: String,
    pub frames_sent: u64,
    pub frames_failed: u64,
    pub bytes_sent: u64,
    pub samples_per_frame: usize,
    pub next_sequence: i32,
}

pub fn print_send_summary(summary: &SendSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "SENT", "FAILED", "BYTES", "SAMPLES", "NEXT SEQ"])
                .add_row(vec![
                    summary.destination.clone(),
                    summary.frames_sent.to_string(),
                    summary.frames_failed.to_string(),
                    summary.bytes_sent.to_string(),
                    summary.samples_per_frame.to_string(),
                    summary.next_sequence.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "destination={} sent={} failed={} bytes={} samples={} next_seq={}",
                summary.destination,
                summary.frames_sent,
                summary.frames_failed,
                summary.bytes_sent,
                summary.samples_per_frame,
                summary.next_sequence
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

const PREVIEW_SAMPLES: usize = 6;

fn sample_preview(samples: &[f64]) -> String {
    let shown: Vec<String> = samples
        .iter()
        .take(PREVIEW_SAMPLES)
        .map(|v| format!("{v:.4}"))
        .collect();
    if samples.len() > PREVIEW_SAMPLES {
        format!("[{}, … +{}]", shown.join(", "), samples.len() - PREVIEW_SAMPLES)
    } else {
        format!("[{}]", shown.join(", "))
    }
}
