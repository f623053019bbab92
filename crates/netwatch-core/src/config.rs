//! Configuration loading for netwatch services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NETWATCH_<SECTION>__<KEY>`, e.g. `NETWATCH_ENGINE__FAN_OUT`)
//! 2. Config file (`netwatch.toml` by default)
//! 3. Defaults

use serde::de::DeserializeOwned;

/// Load one section of the layered configuration.
///
/// A missing file is fine. A missing or malformed section falls back to
/// `T::default()`; a malformed source (unreadable file, bad syntax) is an error.
pub fn load_section<T>(file_prefix: &str, section: &str) -> Result<T, config::ConfigError>
where
    T: DeserializeOwned + Default,
{
    // NETWATCH_ENGINE__FAN_OUT -> engine.fan_out
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NETWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<T>(section) {
        Ok(section) => Ok(section),
        Err(e) => {
            tracing::debug!(section, error = %e, "Config section missing, using defaults");
            Ok(T::default())
        }
    }
}
