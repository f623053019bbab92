//! Event types relayed over the progress bus.
//!
//! Every event is tagged with the scan run and, for scheduled ticks, the job
//! that produced it, so observers can tell concurrent scans apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{JobId, NetworkScanResult, PortScanResult, ScanId, ScanKind};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by a scan, sweep, or scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: EventId,
    /// The scan run, absent for job-level events such as a skipped tick.
    pub scan_id: Option<ScanId>,
    /// The scheduled job, present only for scheduled runs.
    pub job_id: Option<JobId>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl ScanEvent {
    /// An event belonging to one scan run.
    pub fn scan(scan_id: ScanId, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            scan_id: Some(scan_id),
            job_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A job-level event not tied to a single run.
    pub fn job(job_id: JobId, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            scan_id: None,
            job_id: Some(job_id),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_job(mut self, job_id: Option<JobId>) -> Self {
        self.job_id = job_id;
        self
    }

    /// True for progress updates.
    pub fn is_progress(&self) -> bool {
        matches!(self.payload, EventPayload::Progress { .. })
    }

    /// True once the run has reached a terminal outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::PortScanCompleted { .. }
                | EventPayload::SweepCompleted { .. }
                | EventPayload::ScanCancelled { .. }
                | EventPayload::ScanFailed { .. }
        )
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── Scan lifecycle ────────────────────────────────────────
    /// A scan passed validation and began probing.
    ScanStarted {
        kind: ScanKind,
        target: String,
        total: u32,
    },
    /// One more probe resolved. `percent` never decreases within a run.
    Progress { done: u32, total: u32, percent: u8 },
    /// A port scan finished normally.
    PortScanCompleted { result: PortScanResult },
    /// A subnet sweep finished normally.
    SweepCompleted { result: NetworkScanResult },
    /// The run was cancelled; its partial result is not persisted.
    ScanCancelled { done: u32, total: u32 },
    /// The run aborted on an internal fault.
    ScanFailed { error: String },

    // ── Scheduler ─────────────────────────────────────────────
    /// A recurring job was registered.
    JobRegistered {
        target: String,
        interval_minutes: u32,
    },
    /// A tick fired while the previous run was still in flight.
    TickSkipped,
    /// A recurring job was cancelled.
    JobCancelled,
}

/// `round(done / total * 100)` in integer arithmetic, capped at 100.
pub fn percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u64::from(done.min(total));
    let total = u64::from(total);
    ((done * 100 + total / 2) / total) as u8
}
