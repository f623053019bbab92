//! Configuration for the netwatch scan engine.

use std::time::Duration;

use netwatch_core::types::ScanTarget;
use serde::Deserialize;

/// Upper bound on probes in flight within a single scan.
pub const MAX_FAN_OUT: usize = 1024;

/// Top-level engine configuration.
///
/// Loaded from the `netwatch.toml` `[engine]` section or
/// `NETWATCH_ENGINE__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Per-port TCP connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-host liveness check timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// How hosts are checked for liveness.
    #[serde(default)]
    pub liveness: LivenessMethod,

    /// Ports tried by the TCP liveness check.
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<u16>,

    /// Maximum concurrent probes per scan.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Events buffered per progress bus subscriber before it starts lagging.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Directory for the JSON file store. In-memory when unset.
    #[serde(default)]
    pub store_dir: Option<String>,

    /// Recurring jobs registered when the daemon starts.
    #[serde(default)]
    pub jobs: Vec<JobSchedule>,
}

/// A recurring port scan declared in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSchedule {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,

    #[serde(default = "default_interval")]
    pub interval_minutes: u32,

    /// Whether this job is registered at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl JobSchedule {
    pub fn target(&self) -> ScanTarget {
        ScanTarget::new(self.host.clone(), self.start_port, self.end_port)
    }
}

/// Host liveness strategies.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LivenessMethod {
    /// ICMP echo through the system `ping`, TCP when `ping` cannot be run.
    #[default]
    Auto,
    /// ICMP echo only.
    Icmp,
    /// TCP connect against the fallback ports only.
    Tcp,
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Fan-out clamped to `1..=MAX_FAN_OUT`.
    pub fn effective_fan_out(&self) -> usize {
        self.fan_out.clamp(1, MAX_FAN_OUT)
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_fallback_ports() -> Vec<u16> {
    vec![80, 443, 22, 445]
}

fn default_fan_out() -> usize {
    64
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_interval() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            liveness_timeout_ms: default_timeout_ms(),
            liveness: LivenessMethod::default(),
            fallback_ports: default_fallback_ports(),
            fan_out: default_fan_out(),
            bus_capacity: default_bus_capacity(),
            store_dir: None,
            jobs: Vec::new(),
        }
    }
}
