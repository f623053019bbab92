//! Store calls from async code.
//!
//! Stores are synchronous and may touch the file system, so every call made
//! from a scan or tick task goes through the blocking pool.

use crate::error::{Result, ScanError};

pub(crate) async fn store_call<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> netwatch_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let joined = tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ScanError::Task(e.to_string()))?;
    Ok(joined?)
}
