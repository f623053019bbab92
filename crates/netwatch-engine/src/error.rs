//! Error types for the netwatch-engine crate.

use netwatch_core::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Could not resolve host {host}")]
    Unresolvable { host: String },

    #[error("Probe task failed: {0}")]
    ProbeTask(String),

    #[error("Scan task failed: {0}")]
    Task(String),

    #[error("Store error: {0}")]
    Store(#[from] netwatch_store::StoreError),
}

impl ScanError {
    /// True when the request itself was malformed, before any network I/O.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Unresolvable { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
