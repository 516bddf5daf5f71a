//! The interface every check type implements.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, RawConfig};

/// Why a probe could not produce a verdict. Always counted as a failure.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),
}

/// A check-type specific probe.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Validate and apply the type-specific keys of a check config.
    fn apply_check_config(&mut self, raw: &RawConfig) -> Result<(), ConfigError>;

    /// Probe `host:port` once.
    async fn perform(&self, host: &str, port: u16) -> Result<bool, ProbeError>;
}

/// Shared `timeout_ms` option, defaulting to two seconds.
pub(crate) fn timeout_from(raw: &RawConfig) -> Result<Duration, ConfigError> {
    match raw.get("timeout_ms") {
        None => Ok(Duration::from_secs(2)),
        Some(value) => value
            .as_u64()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| ConfigError::invalid("timeout_ms", "expected a positive integer")),
    }
}
