use thiserror::Error;

/// A malformed target, range, or interval.
///
/// Raised before any network I/O and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Host must not be empty")]
    EmptyHost,

    #[error("Invalid port range {start}-{end}: expected 1 <= start <= end <= 65535")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("Subnet prefix must not be empty")]
    EmptySubnetPrefix,

    #[error("Subnet prefix {prefix:?} does not form an IPv4 address with a host index")]
    InvalidSubnetPrefix { prefix: String },

    #[error("Invalid host range {lo}-{hi}: expected 1 <= lo <= hi <= 254")]
    InvalidHostRange { lo: u8, hi: u8 },

    #[error("Interval must be at least 1 minute, got {0}")]
    InvalidInterval(u32),
}
