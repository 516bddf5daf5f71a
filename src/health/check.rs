//! Rise/fall hysteresis over raw probe results.

use crate::config::validation::validate_check;
use crate::config::{ConfigError, RawConfig};
use crate::health::history::ResultHistory;
use crate::health::probe::Probe;

/// One probe bound to `(host, port)` with a debounced verdict.
pub struct HealthCheck {
    name: String,
    host: String,
    port: u16,
    rise: usize,
    fall: usize,
    history: ResultHistory,
    passing: bool,
    probe: Box<dyn Probe>,
}

impl HealthCheck {
    pub fn from_config(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        raw: &RawConfig,
        probe: Box<dyn Probe>,
    ) -> Result<Self, ConfigError> {
        let mut check = Self {
            name: name.into(),
            host: host.into(),
            port,
            rise: 1,
            fall: 1,
            history: ResultHistory::new(1),
            passing: false,
            probe,
        };
        check.apply_config(raw)?;
        Ok(check)
    }

    /// Reconfigure in place. The history is resized, not reset.
    pub fn apply_config(&mut self, raw: &RawConfig) -> Result<(), ConfigError> {
        let (rise, fall) = validate_check(raw)?;
        self.probe.apply_check_config(raw)?;
        self.rise = rise;
        self.fall = fall;
        self.history.resize(rise.max(fall));
        Ok(())
    }

    pub fn set_host(&mut self, host: &str) {
        if self.host != host {
            self.host = host.to_string();
        }
    }

    /// Probe once and update the verdict. Probe errors count as failures.
    pub async fn run(&mut self) -> bool {
        let result = match self.probe.perform(&self.host, self.port).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(check = %self.name, host = %self.host, port = self.port, error = %e, "Check errored");
                false
            }
        };
        tracing::debug!(check = %self.name, port = self.port, result, "Check result");
        self.record(result)
    }

    /// Append a result and re-evaluate hysteresis; returns the verdict.
    pub fn record(&mut self, result: bool) -> bool {
        self.history.push(result);

        if self.passing && self.history.latest_all(self.fall, false) {
            tracing::info!(check = %self.name, port = self.port, fall = self.fall, "Check no longer passing");
            self.passing = false;
        }
        if !self.passing && self.history.latest_all(self.rise, true) {
            tracing::info!(check = %self.name, port = self.port, rise = self.rise, "Check now passing");
            self.passing = true;
        }
        self.passing
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passing(&self) -> bool {
        self.passing
    }

    pub fn rise(&self) -> usize {
        self.rise
    }

    pub fn fall(&self) -> usize {
        self.fall
    }

    pub fn history(&self) -> &ResultHistory {
        &self.history
    }
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("rise", &self.rise)
            .field("fall", &self.fall)
            .field("passing", &self.passing)
            .finish()
    }
}
