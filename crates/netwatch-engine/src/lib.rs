//! netwatch-engine: Scan execution and scheduling for netwatch.
//!
//! Enumerates open TCP ports on a host, sweeps subnets for live hosts, and
//! re-runs port scans on a schedule. Every run streams progress over a
//! shared bus and completed results are handed to a store.

mod blocking;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
mod fanout;
pub mod notify;
pub mod probe;
pub mod scanner;
pub mod scheduler;
pub mod sweep;

pub use bus::{BusReporter, ProgressBus, ProgressSink, Subscription};
pub use config::{EngineConfig, JobSchedule, LivenessMethod};
pub use engine::{Engine, ScanHandle};
pub use error::{Result, ScanError};
pub use notify::{spawn_forwarder, NotificationSink, TracingSink};
pub use probe::{NetProber, ProbeOutcome, Prober};
pub use scanner::{PortScanner, ScanOutcome};
pub use scheduler::Scheduler;
pub use sweep::SubnetSweeper;
