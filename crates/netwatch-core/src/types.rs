//! Core domain types for the netwatch scan engine.
//!
//! Targets are validated before any probing begins; results are immutable
//! once a scan finishes and are handed to the result store by the caller.

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ── Identifiers ───────────────────────────────────────────────────

/// Unique identifier for one scan run (ad hoc or scheduled tick).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle for a registered recurring job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of scan produced an event or record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    PortScan,
    Sweep,
    Ping,
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PortScan => "port_scan",
            Self::Sweep => "sweep",
            Self::Ping => "ping",
        };
        f.write_str(s)
    }
}

// ── Port scan ─────────────────────────────────────────────────────

/// Inclusive TCP port range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports in the range. Zero for an inverted range.
    pub fn len(&self) -> u32 {
        if self.start > self.end {
            0
        } else {
            u32::from(self.end) - u32::from(self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start == 0 || self.start > self.end {
            return Err(ValidationError::InvalidPortRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A single host and the port range to enumerate on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanTarget {
    pub host: String,
    pub port_range: PortRange,
}

impl ScanTarget {
    pub fn new(host: impl Into<String>, start: u16, end: u16) -> Self {
        Self {
            host: host.into(),
            port_range: PortRange::new(start, end),
        }
    }

    /// Structural validation. Host resolution is the scanner's job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        self.port_range.validate()
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port_range)
    }
}

/// Outcome of one port scan run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortScanResult {
    pub id: ScanId,
    pub target: ScanTarget,
    /// Strictly ascending, each within the target range.
    pub open_ports: Vec<u16>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ── Subnet sweep ──────────────────────────────────────────────────

/// Inclusive range of host indices appended to a subnet prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRange {
    pub lo: u8,
    pub hi: u8,
}

impl HostRange {
    pub fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn len(&self) -> u32 {
        if self.lo > self.hi {
            0
        } else {
            u32::from(self.hi) - u32::from(self.lo) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> RangeInclusive<u8> {
        self.lo..=self.hi
    }
}

/// A subnet prefix such as `"10.0.0."` and the host indices to sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepTarget {
    pub subnet_prefix: String,
    pub host_range: HostRange,
}

impl SweepTarget {
    pub fn new(subnet_prefix: impl Into<String>, lo: u8, hi: u8) -> Self {
        Self {
            subnet_prefix: subnet_prefix.into(),
            host_range: HostRange::new(lo, hi),
        }
    }

    /// The address for host index `i`: the prefix concatenated with `i`.
    pub fn address(&self, index: u8) -> String {
        format!("{}{}", self.subnet_prefix, index)
    }

    /// All `(index, address)` pairs in ascending index order.
    pub fn addresses(&self) -> impl Iterator<Item = (u8, String)> + '_ {
        self.host_range.indices().map(|i| (i, self.address(i)))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subnet_prefix.trim().is_empty() {
            return Err(ValidationError::EmptySubnetPrefix);
        }
        let HostRange { lo, hi } = self.host_range;
        if lo == 0 || hi > 254 || lo > hi {
            return Err(ValidationError::InvalidHostRange { lo, hi });
        }
        // Concatenation is monotonic in the index, so checking both ends covers the range.
        if self.address(lo).parse::<Ipv4Addr>().is_err()
            || self.address(hi).parse::<Ipv4Addr>().is_err()
        {
            return Err(ValidationError::InvalidSubnetPrefix {
                prefix: self.subnet_prefix.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SweepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}-{}]",
            self.subnet_prefix, self.host_range.lo, self.host_range.hi
        )
    }
}

/// Outcome of one subnet sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkScanResult {
    pub id: ScanId,
    pub target: SweepTarget,
    /// Live hosts in ascending host-index order.
    pub active_hosts: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ── Ping ──────────────────────────────────────────────────────────

/// A single-host liveness check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResult {
    pub id: ScanId,
    pub host: String,
    pub alive: bool,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

// ── Scheduled jobs ────────────────────────────────────────────────

/// Lifecycle of a scheduled job. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Active,
    Cancelled,
}

/// A recurring port scan and its run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: JobId,
    pub target: ScanTarget,
    pub interval_minutes: u32,
    #[serde(default)]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Append-only; never truncated, not even on cancellation.
    pub history: Vec<PortScanResult>,
}

impl ScheduledJob {
    /// Build a new active job, rejecting a bad target or an interval below one minute.
    pub fn new(target: ScanTarget, interval_minutes: u32) -> Result<Self, ValidationError> {
        if interval_minutes < 1 {
            return Err(ValidationError::InvalidInterval(interval_minutes));
        }
        target.validate()?;
        Ok(Self {
            id: JobId::new(),
            target,
            interval_minutes,
            status: JobStatus::Active,
            created_at: Utc::now(),
            last_run_at: None,
            history: Vec::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Append a finished run and stamp `last_run_at`.
    pub fn record_run(&mut self, result: PortScanResult) {
        self.last_run_at = Some(result.finished_at);
        self.history.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_validation() {
        assert!(PortRange::new(1, 65535).validate().is_ok());
        assert!(PortRange::new(80, 80).validate().is_ok());
        assert_eq!(
            PortRange::new(5, 1).validate(),
            Err(ValidationError::InvalidPortRange { start: 5, end: 1 })
        );
        assert!(PortRange::new(0, 10).validate().is_err());
    }

    #[test]
    fn port_range_len() {
        assert_eq!(PortRange::new(1, 65535).len(), 65535);
        assert_eq!(PortRange::new(22, 22).len(), 1);
        assert_eq!(PortRange::new(5, 1).len(), 0);
    }

    #[test]
    fn scan_target_rejects_blank_host() {
        let target = ScanTarget::new("  ", 1, 10);
        assert_eq!(target.validate(), Err(ValidationError::EmptyHost));
    }

    #[test]
    fn sweep_target_addresses() {
        let target = SweepTarget::new("10.0.0.", 1, 3);
        let addrs: Vec<_> = target.addresses().map(|(_, a)| a).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn sweep_target_validation() {
        assert!(SweepTarget::new("192.168.1.", 1, 254).validate().is_ok());
        assert_eq!(
            SweepTarget::new("", 1, 5).validate(),
            Err(ValidationError::EmptySubnetPrefix)
        );
        assert_eq!(
            SweepTarget::new("10.0.0.", 6, 5).validate(),
            Err(ValidationError::InvalidHostRange { lo: 6, hi: 5 })
        );
        assert!(SweepTarget::new("10.0.0.", 0, 5).validate().is_err());
        assert!(SweepTarget::new("10.0.0.", 1, 255).validate().is_err());
        assert!(matches!(
            SweepTarget::new("not-a-net", 1, 5).validate(),
            Err(ValidationError::InvalidSubnetPrefix { .. })
        ));
        // "10.0.0.2" + 99 is not an address even though "10.0.0.2" + 1 is.
        assert!(matches!(
            SweepTarget::new("10.0.0.2", 1, 99).validate(),
            Err(ValidationError::InvalidSubnetPrefix { .. })
        ));
    }

    #[test]
    fn scheduled_job_rejects_zero_interval() {
        let err = ScheduledJob::new(ScanTarget::new("127.0.0.1", 1, 10), 0).unwrap_err();
        assert_eq!(err, ValidationError::InvalidInterval(0));
    }

    #[test]
    fn scheduled_job_rejects_bad_target() {
        let err = ScheduledJob::new(ScanTarget::new("127.0.0.1", 10, 1), 5).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPortRange { .. }));
    }

    #[test]
    fn record_run_appends_and_stamps() {
        let target = ScanTarget::new("127.0.0.1", 1, 10);
        let mut job = ScheduledJob::new(target.clone(), 1).unwrap();
        let now = Utc::now();
        job.record_run(PortScanResult {
            id: ScanId::new(),
            target,
            open_ports: vec![3],
            started_at: now,
            finished_at: now,
        });
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.last_run_at, Some(now));
        assert!(job.is_active());
    }
}
