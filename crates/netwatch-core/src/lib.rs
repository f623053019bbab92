//! netwatch-core: Shared types, events, and configuration for the netwatch scan engine.
//!
//! This crate provides the foundational types used across all netwatch crates:
//! - Scan targets and results (port scans, subnet sweeps, pings)
//! - Scheduled job records and their run history
//! - Progress and completion events relayed over the progress bus
//! - Layered configuration loading
//! - Validation errors for malformed targets

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::ValidationError;
pub use events::{EventPayload, ScanEvent};
pub use types::{
    HostRange, JobId, JobStatus, NetworkScanResult, PingResult, PortRange, PortScanResult, ScanId,
    ScanKind, ScanTarget, ScheduledJob, SweepTarget,
};
