//! Turns upload events into log lines with throughput and ETA.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scoreplay_transfer::Throughput;
use scoreplay_upload::UploadEvent;

/// Logs every event until the orchestrator drops its sender.
pub async fn watch(mut events: mpsc::Receiver<UploadEvent>) {
    let meter = Throughput::default();
    while let Some(event) = events.recv().await {
        log_event(&meter, &event);
    }
}

fn log_event(meter: &Throughput, event: &UploadEvent) {
    match event {
        UploadEvent::SessionStarted {
            session_id,
            part_size,
            part_count,
            total_bytes,
        } => info!(
            session = %session_id,
            part_size = %format_bytes(*part_size),
            parts = part_count,
            size = %format_bytes(*total_bytes),
            "session ready"
        ),
        UploadEvent::Reconciled {
            session_id,
            confirmed,
        } => info!(session = %session_id, confirmed, "server already holds parts"),
        UploadEvent::PartSkipped { part, bytes } => {
            debug!(part, bytes, "part already uploaded, skipping")
        }
        UploadEvent::PartUploaded {
            part,
            bytes,
            done_bytes,
            total_bytes,
        } => {
            meter.record(*bytes);
            let eta = meter.eta(total_bytes.saturating_sub(*done_bytes));
            info!(
                part,
                progress = %format!("{}/{}", format_bytes(*done_bytes), format_bytes(*total_bytes)),
                percent = percent(*done_bytes, *total_bytes),
                rate = %format!("{}/s", format_bytes(meter.bytes_per_second() as u64)),
                eta = %format_eta(eta),
                "part uploaded"
            );
        }
        UploadEvent::Halted {
            session_id,
            transferred,
            remaining,
        } => info!(session = %session_id, transferred, remaining, "upload halted"),
        UploadEvent::Completed {
            session_id,
            file_id,
        } => info!(session = %session_id, file_id = %file_id, "upload complete"),
        UploadEvent::Failed { session_id, error } => warn!(
            session = session_id.as_deref().unwrap_or("-"),
            error = %error,
            "upload failed"
        ),
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    done.saturating_mul(100) / total
}

/// Human-readable size, e.g. `4.0 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "-".into();
    };
    let secs = eta.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
