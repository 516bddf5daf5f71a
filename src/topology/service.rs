//! Locally run services and their per-port check rounds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::schema::ServiceSettings;
use crate::config::validation::validate_service;
use crate::config::{ConfigError, Configurable, RawConfig};
use crate::health::HealthCheck;
use crate::plugins::Plugins;

/// Last reported state of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortStatus {
    /// No round has completed since start or since the last reset.
    #[default]
    Unknown,
    Up,
    Down,
}

#[derive(Default)]
struct CheckState {
    /// port → check type → check
    checks: BTreeMap<u16, BTreeMap<String, HealthCheck>>,
    status: BTreeMap<u16, PortStatus>,
    /// Settings the checks were last reconciled against.
    applied: Option<Arc<ServiceSettings>>,
}

pub struct Service {
    name: String,
    settings: ArcSwap<ServiceSettings>,
    raw: ArcSwap<RawConfig>,
    plugins: Arc<Plugins>,
    state: Mutex<CheckState>,
}

/// Valid ports from the configured list; bad entries are logged and skipped.
pub fn resolve_ports(service: &str, configured: &[Value]) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for value in configured {
        let port = match value {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        match port {
            Some(port) if port > 0 => {
                ports.insert(port);
            }
            _ => tracing::error!(service = %service, value = %value, "Invalid port value"),
        }
    }
    ports
}

impl Service {
    pub fn settings(&self) -> Arc<ServiceSettings> {
        self.settings.load_full()
    }

    pub fn discovery(&self) -> String {
        self.settings.load().discovery.clone()
    }

    pub fn ports(&self) -> BTreeSet<u16> {
        resolve_ports(&self.name, &self.settings.load().configured_ports)
    }

    /// Run one round of checks.
    ///
    /// Returns `(came_up, went_down)`. The first round after start or reset
    /// reports every port one way or the other. Ports dropped from config
    /// are reported down and their checks discarded.
    pub async fn run_checks(&self) -> (BTreeSet<u16>, BTreeSet<u16>) {
        let settings = self.settings.load_full();
        let ports = resolve_ports(&self.name, &settings.configured_ports);

        let mut state = self.state.lock().await;
        self.reconcile(&mut state, &settings, &ports);

        let mut came_up = BTreeSet::new();
        let mut went_down = BTreeSet::new();

        for port in &ports {
            let checks = state.checks.entry(*port).or_default();
            if checks.is_empty() {
                tracing::warn!(service = %self.name, port, "No valid checks for port, treated as failing");
            }

            let mut checks_pass = !checks.is_empty();
            for (check_name, check) in checks.iter_mut() {
                let passing = check.run().await;
                crate::observability::metrics::record_check_result(&self.name, check_name, passing);
                checks_pass &= passing;
            }

            let status = state.status.entry(*port).or_default();
            match (*status, checks_pass) {
                (PortStatus::Unknown | PortStatus::Down, true) => {
                    came_up.insert(*port);
                    *status = PortStatus::Up;
                }
                (PortStatus::Unknown | PortStatus::Up, false) => {
                    went_down.insert(*port);
                    *status = PortStatus::Down;
                }
                _ => {}
            }
        }

        let stale: Vec<u16> = state.checks.keys().filter(|port| !ports.contains(port)).copied().collect();
        for port in stale {
            tracing::info!(service = %self.name, port, "Port no longer configured");
            state.checks.remove(&port);
            state.status.remove(&port);
            went_down.insert(port);
        }

        (came_up, went_down)
    }

    /// Bring the check set in line with `settings`, reusing existing checks.
    fn reconcile(&self, state: &mut CheckState, settings: &Arc<ServiceSettings>, ports: &BTreeSet<u16>) {
        if state.applied.as_ref().is_some_and(|applied| Arc::ptr_eq(applied, settings)) {
            return;
        }

        for port in ports {
            let checks = state.checks.entry(*port).or_default();
            checks.retain(|check_name, _| settings.checks.contains_key(check_name));

            for (check_name, raw) in &settings.checks {
                let result = match checks.get_mut(check_name) {
                    Some(check) => {
                        check.set_host(&settings.host);
                        check.apply_config(raw)
                    }
                    None => self
                        .plugins
                        .new_check(check_name, &settings.host, *port, raw)
                        .map(|check| {
                            checks.insert(check_name.clone(), check);
                        }),
                };
                if let Err(e) = result {
                    tracing::error!(
                        service = %self.name,
                        check = %check_name,
                        port,
                        error = %e,
                        "Error configuring check"
                    );
                    checks.remove(check_name);
                }
            }
        }

        state.applied = Some(settings.clone());
    }

    /// Forget reported state so the next round reports every port again.
    pub async fn reset_status(&self) {
        let mut state = self.state.lock().await;
        state.status.clear();
    }

    pub async fn status(&self, port: u16) -> PortStatus {
        let state = self.state.lock().await;
        state.status.get(&port).copied().unwrap_or_default()
    }

    /// Ports last reported up.
    pub async fn up_ports(&self) -> Vec<u16> {
        let state = self.state.lock().await;
        state
            .status
            .iter()
            .filter(|(_, status)| **status == PortStatus::Up)
            .map(|(port, _)| *port)
            .collect()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").field("name", &self.name).finish()
    }
}

impl Configurable for Service {
    const KIND: &'static str = "service";
    const SUBDIRECTORY: &'static str = "services";

    fn validate_config(_name: &str, raw: &RawConfig, plugins: &Plugins) -> Result<(), ConfigError> {
        let settings = validate_service(raw)?;
        plugins.discovery(&settings.discovery)?;
        for (check_name, check_raw) in &settings.checks {
            plugins.validate_check(check_name, check_raw)?;
        }
        Ok(())
    }

    fn from_config(name: &str, raw: &RawConfig, plugins: &Arc<Plugins>) -> Result<Self, ConfigError> {
        Self::validate_config(name, raw, plugins)?;
        Ok(Self {
            name: name.to_string(),
            settings: ArcSwap::from_pointee(validate_service(raw)?),
            raw: ArcSwap::from_pointee(raw.clone()),
            plugins: plugins.clone(),
            state: Mutex::new(CheckState::default()),
        })
    }

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        let settings = validate_service(raw)?;
        if **self.settings.load() != settings {
            self.settings.store(Arc::new(settings));
        }
        self.raw.store(Arc::new(raw.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> RawConfig {
        self.raw.load().as_ref().clone()
    }
}
