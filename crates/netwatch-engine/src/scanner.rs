//! TCP port scanner.
//!
//! Connects to every port of one host with a bounded number of probes in
//! flight. Validation and host resolution happen before the first probe.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use netwatch_core::types::{PortScanResult, ScanId, ScanTarget};

use crate::bus::ProgressSink;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fanout;
use crate::probe::{self, Prober};

/// How a scan run ended.
///
/// A cancelled run still carries what it found so far, but it is not a
/// completed scan and must not be persisted as one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome<T> {
    Completed(T),
    Cancelled(T),
}

impl<T> ScanOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The full or partial result.
    pub fn result(&self) -> &T {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }

    /// The result only if the run completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(r) => Some(r),
            Self::Cancelled(_) => None,
        }
    }
}

/// Enumerates open TCP ports on a single host.
#[derive(Clone)]
pub struct PortScanner {
    prober: Arc<dyn Prober>,
    fan_out: usize,
    timeout: Duration,
}

impl PortScanner {
    pub fn new(prober: Arc<dyn Prober>, fan_out: usize, timeout: Duration) -> Self {
        Self {
            prober,
            fan_out: fan_out.max(1),
            timeout,
        }
    }

    pub fn from_config(prober: Arc<dyn Prober>, config: &EngineConfig) -> Self {
        Self::new(prober, config.effective_fan_out(), config.connect_timeout())
    }

    /// Validate the target and resolve its host, bounded by the connect
    /// timeout. No probe is sent.
    pub async fn prepare(&self, target: &ScanTarget) -> Result<IpAddr> {
        target.validate()?;
        probe::resolve_host(&target.host, self.timeout).await
    }

    /// Validate, resolve, then scan every port in the target range.
    pub async fn scan(
        &self,
        target: ScanTarget,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome<PortScanResult>> {
        let addr = self.prepare(&target).await?;
        self.scan_resolved(ScanId::new(), target, addr, sink, cancel)
            .await
    }

    /// Scan an already validated and resolved target.
    pub async fn scan_resolved(
        &self,
        id: ScanId,
        target: ScanTarget,
        addr: IpAddr,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome<PortScanResult>> {
        let started_at = Utc::now();
        let total = target.port_range.len();

        tracing::info!(
            scan_id = %id,
            target = %target,
            addr = %addr,
            fan_out = self.fan_out,
            "Port scan started"
        );

        let prober = self.prober.clone();
        let timeout = self.timeout;
        let run = fanout::probe_all(
            target.port_range.ports(),
            total,
            self.fan_out,
            cancel,
            sink,
            move |port| {
                let prober = prober.clone();
                async move {
                    let outcome = prober.probe_port(addr, port, timeout).await;
                    if outcome.reachable {
                        tracing::debug!(addr = %addr, port, "Port open");
                    }
                    outcome.reachable
                }
            },
        )
        .await?;

        let result = PortScanResult {
            id,
            target,
            open_ports: run.reachable.into_iter().collect(),
            started_at,
            finished_at: Utc::now(),
        };

        let duration_ms = (result.finished_at - started_at).num_milliseconds();
        if run.cancelled {
            tracing::info!(
                scan_id = %id,
                done = run.done,
                total,
                open = result.open_ports.len(),
                "Port scan cancelled"
            );
            Ok(ScanOutcome::Cancelled(result))
        } else {
            tracing::info!(
                scan_id = %id,
                target = %result.target,
                open_ports = ?result.open_ports,
                duration_ms,
                "Port scan complete"
            );
            Ok(ScanOutcome::Completed(result))
        }
    }
}
