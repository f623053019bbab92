//! Forwarding bus events to an outside observer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netwatch_core::events::{EventPayload, ScanEvent};

use crate::bus::ProgressBus;

/// Receives every forwarded event. Must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ScanEvent);
}

/// Writes lifecycle events to the log. Per-probe progress goes to `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &ScanEvent) {
        let scan_id = event.scan_id.map(|id| id.to_string()).unwrap_or_default();
        let job_id = event.job_id.map(|id| id.to_string()).unwrap_or_default();

        match &event.payload {
            EventPayload::Progress { done, total, percent } => {
                tracing::trace!(%scan_id, %job_id, done, total, percent, "Progress");
            }
            EventPayload::ScanStarted { kind, target, total } => {
                tracing::info!(%scan_id, %job_id, %kind, %target, total, "Scan started");
            }
            EventPayload::PortScanCompleted { result } => {
                tracing::info!(%scan_id, %job_id, open_ports = ?result.open_ports, "Port scan completed");
            }
            EventPayload::SweepCompleted { result } => {
                tracing::info!(%scan_id, active_hosts = ?result.active_hosts, "Sweep completed");
            }
            EventPayload::ScanCancelled { done, total } => {
                tracing::info!(%scan_id, %job_id, done, total, "Scan cancelled");
            }
            EventPayload::ScanFailed { error } => {
                tracing::warn!(%scan_id, %job_id, %error, "Scan failed");
            }
            EventPayload::JobRegistered {
                target,
                interval_minutes,
            } => {
                tracing::info!(%job_id, %target, interval_minutes, "Job registered");
            }
            EventPayload::TickSkipped => tracing::info!(%job_id, "Tick skipped"),
            EventPayload::JobCancelled => tracing::info!(%job_id, "Job cancelled"),
        }
    }
}

/// Drain a fresh bus subscription into `sink` until `shutdown` fires or the
/// bus closes.
pub fn spawn_forwarder(
    bus: &ProgressBus,
    sink: Arc<dyn NotificationSink>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut sub = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                next = sub.recv() => match next {
                    Some(event) => sink.notify(&event),
                    None => break,
                },
            }
        }
        tracing::debug!("Notification forwarder stopped");
    })
}
