//! The request surface: ad hoc scans, sweeps, pings, searches, and the
//! scheduler, all publishing onto one progress bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netwatch_core::events::EventPayload;
use netwatch_core::types::{
    NetworkScanResult, PingResult, PortScanResult, ScanId, ScanKind, ScanTarget, ScheduledJob,
    SweepTarget,
};
use netwatch_store::file::JsonFileStore;
use netwatch_store::memory::MemoryStore;
use netwatch_store::{JobStore, RecordKind, ResultStore, ScanRecord};

use crate::blocking;
use crate::bus::{BusReporter, ProgressBus};
use crate::config::EngineConfig;
use crate::error::{Result, ScanError};
use crate::probe::{self, NetProber, Prober};
use crate::scanner::{PortScanner, ScanOutcome};
use crate::scheduler::Scheduler;
use crate::sweep::SubnetSweeper;

type InFlight = Arc<Mutex<HashMap<ScanId, CancellationToken>>>;

/// A scan running on its own task.
#[derive(Debug)]
pub struct ScanHandle<T> {
    scan_id: ScanId,
    handle: JoinHandle<Result<ScanOutcome<T>>>,
}

impl<T> ScanHandle<T> {
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    /// Wait for the scan to finish or be cancelled.
    pub async fn wait(self) -> Result<ScanOutcome<T>> {
        self.handle
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }
}

/// Everything a caller needs: scanning, sweeping, scheduling, and search.
pub struct Engine {
    config: EngineConfig,
    prober: Arc<dyn Prober>,
    scanner: PortScanner,
    sweeper: SubnetSweeper,
    bus: ProgressBus,
    results: Arc<dyn ResultStore>,
    jobs: Arc<dyn JobStore>,
    scheduler: Scheduler,
    in_flight: InFlight,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        prober: Arc<dyn Prober>,
        results: Arc<dyn ResultStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        let bus = ProgressBus::new(config.bus_capacity);
        let scanner = PortScanner::from_config(prober.clone(), &config);
        let sweeper = SubnetSweeper::from_config(prober.clone(), &config);
        let scheduler = Scheduler::new(scanner.clone(), bus.clone(), jobs.clone());
        Self {
            config,
            prober,
            scanner,
            sweeper,
            bus,
            results,
            jobs,
            scheduler,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Real network prober, with a JSON file store when `store_dir` is set
    /// and an in-memory store otherwise.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let prober: Arc<dyn Prober> = Arc::new(NetProber::from_config(&config));
        match config.store_dir.clone() {
            Some(dir) => {
                let store = Arc::new(JsonFileStore::new(dir)?);
                Ok(Self::new(config, prober, store.clone(), store))
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                Ok(Self::new(config, prober, store.clone(), store))
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ScanId, CancellationToken>> {
        lock_in_flight(&self.in_flight)
    }

    fn track(&self, scan_id: ScanId) -> CancellationToken {
        let token = CancellationToken::new();
        self.in_flight().insert(scan_id, token.clone());
        token
    }

    // ── Ad hoc scans ──────────────────────────────────────────

    /// Validate and resolve `target`, then start scanning it on its own task.
    ///
    /// A malformed target or unresolvable host fails here, before any probe.
    pub async fn start_port_scan(&self, target: ScanTarget) -> Result<ScanHandle<PortScanResult>> {
        let addr = self.scanner.prepare(&target).await?;
        let scan_id = ScanId::new();
        let cancel = self.track(scan_id);
        let reporter = self.bus.reporter(scan_id, None);
        let total = target.port_range.len();

        reporter.emit(EventPayload::ScanStarted {
            kind: ScanKind::PortScan,
            target: target.to_string(),
            total,
        });

        let scanner = self.scanner.clone();
        let results = self.results.clone();
        let in_flight = self.in_flight.clone();
        let handle = tokio::spawn(async move {
            let outcome = scanner
                .scan_resolved(scan_id, target, addr, &reporter, &cancel)
                .await;
            lock_in_flight(&in_flight).remove(&scan_id);
            finish(outcome, total, &reporter, results, |result| {
                EventPayload::PortScanCompleted { result }
            })
            .await
        });

        Ok(ScanHandle { scan_id, handle })
    }

    /// Validate `target`, then start sweeping it on its own task.
    pub async fn start_sweep(&self, target: SweepTarget) -> Result<ScanHandle<NetworkScanResult>> {
        let plan = self.sweeper.prepare(&target)?;
        let scan_id = ScanId::new();
        let cancel = self.track(scan_id);
        let reporter = self.bus.reporter(scan_id, None);
        let total = target.host_range.len();

        reporter.emit(EventPayload::ScanStarted {
            kind: ScanKind::Sweep,
            target: target.to_string(),
            total,
        });

        let sweeper = self.sweeper.clone();
        let results = self.results.clone();
        let in_flight = self.in_flight.clone();
        let handle = tokio::spawn(async move {
            let outcome = sweeper
                .sweep_planned(scan_id, target, plan, &reporter, &cancel)
                .await;
            lock_in_flight(&in_flight).remove(&scan_id);
            finish(outcome, total, &reporter, results, |result| {
                EventPayload::SweepCompleted { result }
            })
            .await
        });

        Ok(ScanHandle { scan_id, handle })
    }

    /// Signal a running scan or sweep to stop. Returns `false` if it is not running.
    pub fn cancel_scan(&self, scan_id: ScanId) -> bool {
        match self.in_flight().get(&scan_id) {
            Some(token) => {
                tracing::info!(scan_id = %scan_id, "Cancelling scan");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of ad hoc scans and sweeps still running.
    pub fn running_scans(&self) -> usize {
        self.in_flight().len()
    }

    pub async fn scan_ports(&self, target: ScanTarget) -> Result<ScanOutcome<PortScanResult>> {
        self.start_port_scan(target).await?.wait().await
    }

    pub async fn sweep_subnet(
        &self,
        target: SweepTarget,
    ) -> Result<ScanOutcome<NetworkScanResult>> {
        self.start_sweep(target).await?.wait().await
    }

    /// One liveness probe against `host`, stored like any completed scan.
    pub async fn ping(&self, host: &str) -> Result<PingResult> {
        let timeout = self.config.liveness_timeout();
        let addr = probe::resolve_host(host, timeout).await?;
        let outcome = self.prober.probe_host(addr, timeout).await;

        let result = PingResult {
            id: ScanId::new(),
            host: host.trim().to_string(),
            alive: outcome.reachable,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        };
        tracing::info!(
            host = %result.host,
            addr = %addr,
            alive = result.alive,
            elapsed_ms = result.elapsed_ms,
            "Ping complete"
        );

        let record = ScanRecord::from(result.clone());
        let results = self.results.clone();
        blocking::store_call(move || results.save(&record)).await?;
        Ok(result)
    }

    // ── Search and maintenance ────────────────────────────────

    pub fn search_ports(&self, host: &str) -> Result<Vec<PortScanResult>> {
        let records = self.results.find_by_host(RecordKind::PortScan, host)?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                ScanRecord::PortScan(result) => Some(result),
                _ => None,
            })
            .collect())
    }

    /// Sweeps whose subnet prefix starts with `prefix`.
    pub fn search_sweeps(&self, prefix: &str) -> Result<Vec<NetworkScanResult>> {
        let records = self.results.find_by_subnet(prefix)?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                ScanRecord::NetworkScan(result) => Some(result),
                _ => None,
            })
            .collect())
    }

    pub fn search_pings(&self, host: &str) -> Result<Vec<PingResult>> {
        let records = self.results.find_by_host(RecordKind::Ping, host)?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                ScanRecord::Ping(result) => Some(result),
                _ => None,
            })
            .collect())
    }

    pub fn search_jobs(&self, host: &str) -> Result<Vec<ScheduledJob>> {
        Ok(self.jobs.find_by_host(host)?)
    }

    /// Delete every stored result of one kind.
    pub fn clear_results(&self, kind: RecordKind) -> Result<usize> {
        let removed = self.results.delete_all(kind)?;
        tracing::info!(kind = kind.as_str(), removed, "Results cleared");
        Ok(removed)
    }

    /// Cancel every scheduled job and delete the job records.
    pub async fn clear_jobs(&self) -> Result<usize> {
        let removed = self.scheduler.clear().await?;
        tracing::info!(removed, "Jobs cleared");
        Ok(removed)
    }

    /// Cancel running scans and stop the scheduler.
    pub async fn shutdown(&self) {
        for token in self.in_flight().values() {
            token.cancel();
        }
        self.scheduler.shutdown().await;
    }
}

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<ScanId, CancellationToken>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish the terminal event for a run and persist it if it completed.
///
/// A cancelled run is never saved. A store failure is logged; the completed
/// result is still returned and announced.
async fn finish<T>(
    outcome: Result<ScanOutcome<T>>,
    total: u32,
    reporter: &BusReporter,
    results: Arc<dyn ResultStore>,
    completed: impl FnOnce(T) -> EventPayload + Send,
) -> Result<ScanOutcome<T>>
where
    T: Clone + Into<ScanRecord> + Send + 'static,
{
    match outcome {
        Ok(ScanOutcome::Completed(result)) => {
            let record: ScanRecord = result.clone().into();
            if let Err(e) = blocking::store_call(move || results.save(&record)).await {
                tracing::warn!(scan_id = %reporter.scan_id(), error = %e, "Failed to store scan result");
            }
            reporter.emit(completed(result.clone()));
            Ok(ScanOutcome::Completed(result))
        }
        Ok(ScanOutcome::Cancelled(partial)) => {
            reporter.emit(EventPayload::ScanCancelled {
                done: reporter.done(),
                total,
            });
            Ok(ScanOutcome::Cancelled(partial))
        }
        Err(e) => {
            tracing::error!(scan_id = %reporter.scan_id(), error = %e, "Scan aborted");
            reporter.emit(EventPayload::ScanFailed {
                error: e.to_string(),
            });
            Err(e)
        }
    }
}
