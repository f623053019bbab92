//! Recurring port-scan jobs.
//!
//! Each registered job gets its own timer task. A tick that fires while the
//! job's previous run is still in flight is skipped, so a job never scans
//! concurrently with itself. The scheduler is the only writer of job history.
//!
//! A cancelled job leaves the registry at once; its record and history stay
//! in the job store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use netwatch_core::events::{EventPayload, ScanEvent};
use netwatch_core::types::{JobId, JobStatus, ScanId, ScanKind, ScanTarget, ScheduledJob};
use netwatch_store::JobStore;

use crate::blocking;
use crate::bus::{BusReporter, ProgressBus};
use crate::config::JobSchedule;
use crate::error::Result;
use crate::scanner::{PortScanner, ScanOutcome};

/// Owns every scheduled job and its timer task.
#[derive(Clone)]
pub struct Scheduler {
    ctx: TickContext,
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    shutdown: CancellationToken,
}

/// What a tick needs to run a scan and record it.
#[derive(Clone)]
struct TickContext {
    scanner: PortScanner,
    bus: ProgressBus,
    store: Arc<dyn JobStore>,
}

struct JobEntry {
    state: Arc<JobState>,
    handle: JoinHandle<()>,
}

struct JobState {
    job: Mutex<ScheduledJob>,
    running: AtomicBool,
    cancel: CancellationToken,
    // Serializes job store writes for this job.
    persist: tokio::sync::Mutex<()>,
}

impl JobState {
    fn job(&self) -> MutexGuard<'_, ScheduledJob> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard(Arc<JobState>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(scanner: PortScanner, bus: ProgressBus, store: Arc<dyn JobStore>) -> Self {
        Self {
            ctx: TickContext {
                scanner,
                bus,
                store,
            },
            jobs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a recurring scan of `target` every `interval_minutes`.
    ///
    /// The target and interval are validated before anything is persisted or
    /// any timer exists. The first tick fires one full interval from now.
    /// Must be called from within a tokio runtime.
    pub fn register_job(&self, target: ScanTarget, interval_minutes: u32) -> Result<JobId> {
        let job = ScheduledJob::new(target, interval_minutes)?;
        self.ctx.store.save(&job)?;

        let id = job.id;
        let target_label = job.target.to_string();
        let state = Arc::new(JobState {
            job: Mutex::new(job),
            running: AtomicBool::new(false),
            cancel: self.shutdown.child_token(),
            persist: tokio::sync::Mutex::new(()),
        });
        let period = Duration::from_secs(60 * u64::from(interval_minutes));
        let handle = tokio::spawn(run_job_loop(self.ctx.clone(), state.clone(), period));

        self.entries().insert(id, JobEntry { state, handle });

        tracing::info!(job_id = %id, target = %target_label, interval_minutes, "Job registered");
        self.ctx.bus.publish(ScanEvent::job(
            id,
            EventPayload::JobRegistered {
                target: target_label,
                interval_minutes,
            },
        ));
        Ok(id)
    }

    /// Register every enabled job from configuration. Invalid entries are
    /// logged and skipped.
    pub fn register_configured(&self, schedules: &[JobSchedule]) -> Vec<JobId> {
        let mut ids = Vec::new();
        for schedule in schedules {
            if !schedule.enabled {
                tracing::info!(host = %schedule.host, "Job disabled, skipping");
                continue;
            }
            match self.register_job(schedule.target(), schedule.interval_minutes) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    tracing::error!(host = %schedule.host, error = %e, "Configured job rejected");
                }
            }
        }
        tracing::info!(job_count = ids.len(), "Scheduler started");
        ids
    }

    /// Stop future ticks of a job, abandon its in-flight run, and drop it
    /// from the registry.
    ///
    /// Returns `false` for an unknown or already cancelled job. The job
    /// record stays in the store with status `Cancelled` and its history
    /// exactly as it was.
    pub async fn cancel_job(&self, id: JobId) -> bool {
        let removed = self.entries().remove(&id);
        let Some(entry) = removed else {
            tracing::debug!(job_id = %id, "Cancel requested for unknown job");
            return false;
        };
        let state = entry.state;
        state.cancel.cancel();

        // Waits out a tick that is already writing its run.
        let _persist = state.persist.lock().await;
        let snapshot = {
            let mut job = state.job();
            job.status = JobStatus::Cancelled;
            job.clone()
        };
        let runs = snapshot.history.len();
        let store = self.ctx.store.clone();
        if let Err(e) = blocking::store_call(move || store.save(&snapshot)).await {
            tracing::error!(job_id = %id, error = %e, "Failed to persist job cancellation");
        }

        tracing::info!(job_id = %id, runs, "Job cancelled");
        self.ctx
            .bus
            .publish(ScanEvent::job(id, EventPayload::JobCancelled));
        true
    }

    /// Snapshot of one active job, including its history.
    pub fn job(&self, id: JobId) -> Option<ScheduledJob> {
        self.entries().get(&id).map(|e| e.state.job().clone())
    }

    /// Snapshots of every active job, oldest first.
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .entries()
            .values()
            .map(|e| e.state.job().clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Cancel every job, forget them, and wipe the job store.
    pub async fn clear(&self) -> Result<usize> {
        let ids: Vec<JobId> = self.entries().keys().copied().collect();
        for id in ids {
            self.cancel_job(id).await;
        }
        let store = self.ctx.store.clone();
        blocking::store_call(move || store.delete_all()).await
    }

    /// Stop every timer and in-flight run. Job status is not changed.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .entries()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job timer task panicked");
            }
        }
    }
}

/// Per-job timer loop. Exits when the job is cancelled.
async fn run_job_loop(ctx: TickContext, state: Arc<JobState>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = state.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let job_id = state.job().id;
        if state
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(job_id = %job_id, "Previous run still in flight, tick skipped");
            ctx.bus
                .publish(ScanEvent::job(job_id, EventPayload::TickSkipped));
            continue;
        }

        tracing::info!(job_id = %job_id, "Scheduled scan triggered");
        let guard = RunGuard(state.clone());
        let ctx = ctx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let _guard = guard;
            run_tick(&ctx, &state).await;
        });
    }
}

/// One scheduled run. Faults are logged and the job stays active.
async fn run_tick(ctx: &TickContext, state: &JobState) {
    let (job_id, target) = {
        let job = state.job();
        (job.id, job.target.clone())
    };
    let reporter = ctx.bus.reporter(ScanId::new(), Some(job_id));
    let cancel = state.cancel.child_token();

    if let Err(e) = tick(ctx, state, target, &reporter, &cancel).await {
        tracing::error!(job_id = %job_id, scan_id = %reporter.scan_id(), error = %e, "Scheduled scan failed");
        reporter.emit(EventPayload::ScanFailed {
            error: e.to_string(),
        });
    }
}

async fn tick(
    ctx: &TickContext,
    state: &JobState,
    target: ScanTarget,
    reporter: &BusReporter,
    cancel: &CancellationToken,
) -> Result<()> {
    let addr = ctx.scanner.prepare(&target).await?;
    let total = target.port_range.len();
    reporter.emit(EventPayload::ScanStarted {
        kind: ScanKind::PortScan,
        target: target.to_string(),
        total,
    });

    let outcome = ctx
        .scanner
        .scan_resolved(reporter.scan_id(), target, addr, reporter, cancel)
        .await?;

    let result = match outcome {
        ScanOutcome::Completed(result) => result,
        ScanOutcome::Cancelled(_) => {
            reporter.emit(EventPayload::ScanCancelled {
                done: reporter.done(),
                total,
            });
            return Ok(());
        }
    };

    let _persist = state.persist.lock().await;
    // Cancelled after the last probe resolved: discard the run.
    let (job_id, active) = {
        let job = state.job();
        (job.id, job.is_active())
    };
    if !active {
        return Ok(());
    }

    let store = ctx.store.clone();
    let run = result.clone();
    blocking::store_call(move || store.update_on_tick(job_id, run.finished_at, &run)).await?;
    state.job().record_run(result.clone());

    reporter.emit(EventPayload::PortScanCompleted { result });
    Ok(())
}
