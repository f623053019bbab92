//! netwatch-store: persistence collaborators for the scan engine.
//!
//! The engine only ever writes through these traits: one `save` per
//! completed scan, and one `update_on_tick` per finished scheduled run.
//! Reads exist for the request surface (search, history) and never feed
//! back into scanning.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use netwatch_core::types::{
    JobId, NetworkScanResult, PingResult, PortScanResult, ScanId, ScheduledJob,
};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Scheduled job not found: {0}")]
    JobNotFound(JobId),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The kinds of persisted scan results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Ping,
    PortScan,
    NetworkScan,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [Self::Ping, Self::PortScan, Self::NetworkScan];

    /// Stable directory/name segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::PortScan => "port_scan",
            Self::NetworkScan => "network_scan",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ping" | "pings" => Ok(Self::Ping),
            "port_scan" | "ports" | "port-scan" => Ok(Self::PortScan),
            "network_scan" | "sweeps" | "sweep" | "network-scan" => Ok(Self::NetworkScan),
            _ => Err(format!("unknown record kind: {s}")),
        }
    }
}

/// A completed, persistable scan result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanRecord {
    Ping(PingResult),
    PortScan(PortScanResult),
    NetworkScan(NetworkScanResult),
}

impl ScanRecord {
    pub fn id(&self) -> ScanId {
        match self {
            Self::Ping(r) => r.id,
            Self::PortScan(r) => r.id,
            Self::NetworkScan(r) => r.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Ping(_) => RecordKind::Ping,
            Self::PortScan(_) => RecordKind::PortScan,
            Self::NetworkScan(_) => RecordKind::NetworkScan,
        }
    }

    /// When the scan started (or, for a ping, when it ran).
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Ping(r) => r.timestamp,
            Self::PortScan(r) => r.started_at,
            Self::NetworkScan(r) => r.started_at,
        }
    }

    /// The single host a record is about; sweeps have none.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Ping(r) => Some(&r.host),
            Self::PortScan(r) => Some(&r.target.host),
            Self::NetworkScan(_) => None,
        }
    }

    pub fn subnet_prefix(&self) -> Option<&str> {
        match self {
            Self::NetworkScan(r) => Some(&r.target.subnet_prefix),
            _ => None,
        }
    }
}

impl From<PingResult> for ScanRecord {
    fn from(r: PingResult) -> Self {
        Self::Ping(r)
    }
}

impl From<PortScanResult> for ScanRecord {
    fn from(r: PortScanResult) -> Self {
        Self::PortScan(r)
    }
}

impl From<NetworkScanResult> for ScanRecord {
    fn from(r: NetworkScanResult) -> Self {
        Self::NetworkScan(r)
    }
}

/// Query parameters for searching results.
#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    pub kind: Option<RecordKind>,
    /// Exact host match.
    pub host: Option<String>,
    /// Records whose subnet prefix starts with this string.
    pub subnet_prefix: Option<String>,
    /// Only include records at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include records at or before this time.
    pub to: Option<DateTime<Utc>>,
}

impl ResultQuery {
    pub fn matches(&self, record: &ScanRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind() != kind {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if record.host() != Some(host.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.subnet_prefix {
            match record.subnet_prefix() {
                Some(p) if p.starts_with(prefix.as_str()) => {}
                _ => return false,
            }
        }
        let ts = record.timestamp();
        if let Some(from) = &self.from {
            if &ts < from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &ts > to {
                return false;
            }
        }
        true
    }
}

/// Persistence for completed scan results.
pub trait ResultStore: Send + Sync {
    /// Store one completed scan. Never called for a cancelled run.
    fn save(&self, record: &ScanRecord) -> Result<()>;

    /// Records matching the query, newest first.
    fn find(&self, query: &ResultQuery) -> Result<Vec<ScanRecord>>;

    /// Remove every record of `kind`, returning how many were removed.
    fn delete_all(&self, kind: RecordKind) -> Result<usize>;

    fn find_by_host(&self, kind: RecordKind, host: &str) -> Result<Vec<ScanRecord>> {
        self.find(&ResultQuery {
            kind: Some(kind),
            host: Some(host.to_string()),
            ..Default::default()
        })
    }

    fn find_by_subnet(&self, prefix: &str) -> Result<Vec<ScanRecord>> {
        self.find(&ResultQuery {
            kind: Some(RecordKind::NetworkScan),
            subnet_prefix: Some(prefix.to_string()),
            ..Default::default()
        })
    }
}

/// Persistence for scheduled jobs. The scheduler owns all writes.
pub trait JobStore: Send + Sync {
    fn save(&self, job: &ScheduledJob) -> Result<()>;

    /// Append one run to a job's history and stamp `last_run_at`.
    fn update_on_tick(
        &self,
        id: JobId,
        last_run_at: DateTime<Utc>,
        entry: &PortScanResult,
    ) -> Result<()>;

    fn get(&self, id: JobId) -> Result<ScheduledJob>;

    fn find_by_host(&self, host: &str) -> Result<Vec<ScheduledJob>>;

    /// Remove every job record, returning how many were removed.
    fn delete_all(&self) -> Result<usize>;
}
