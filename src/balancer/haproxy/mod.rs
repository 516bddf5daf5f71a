//! HAProxy balancer.
//!
//! # Sync Flow
//! ```text
//! sync(clusters)
//!     → restart not already required? sync_nodes: live enable/disable over the socket
//!     → control.rs: version of the installed binary
//!     → config.rs: render and write the config file
//!     → restart required? wait out restart_interval, then graceful restart
//! ```
//!
//! # Restart Avoidance
//! - A new cluster or a new node in a known cluster needs a restart
//! - Up/down changes of known servers are applied live
//! - Any failed live command falls back to a restart

pub mod config;
pub mod control;
pub mod directives;
pub mod stanza;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::balancer::{Balancer, BalancerError};
use crate::config::schema::HaproxySettings;
use crate::config::validation::validate_haproxy;
use crate::config::{ConfigError, Configurable, RawConfig};
use crate::observability::metrics;
use crate::topology::{Cluster, Peer};

pub use control::{Control, ControlError, Version};

struct SyncState {
    last_restart: Option<Instant>,
}

pub struct HaProxy {
    name: String,
    settings: ArcSwap<HaproxySettings>,
    /// Held for a whole sync so file writes and restarts never interleave.
    state: Mutex<SyncState>,
    restart_required: AtomicBool,
    restarts: AtomicU64,
}

impl HaProxy {
    pub fn new(name: impl Into<String>, settings: HaproxySettings) -> Self {
        Self {
            name: name.into(),
            settings: ArcSwap::from_pointee(settings),
            state: Mutex::new(SyncState { last_restart: None }),
            // Nothing is known about a running process until the first restart.
            restart_required: AtomicBool::new(true),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> Arc<HaproxySettings> {
        self.settings.load_full()
    }

    pub fn control(&self) -> Control {
        Control::new(&self.settings.load())
    }

    pub fn restart_required(&self) -> bool {
        self.restart_required.load(Ordering::SeqCst)
    }

    /// Number of successful restarts since creation.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// `show info` of the running process.
    pub async fn info(&self) -> Result<BTreeMap<String, String>, ControlError> {
        self.control().info().await
    }

    fn require_restart(&self) {
        self.restart_required.store(true, Ordering::SeqCst);
    }

    /// Bring the running process's server states in line with `clusters`.
    ///
    /// Sets the restart flag when a live update is not possible. Returns the
    /// first command error, after trying the remaining commands.
    pub async fn sync_nodes(&self, clusters: &[Arc<Cluster>]) -> Result<(), ControlError> {
        tracing::info!(balancer = %self.name, "Syncing HAProxy backends");
        let control = self.control();
        let active = match control.active_nodes().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(balancer = %self.name, error = %e, "Could not list active servers");
                self.require_restart();
                return Err(e);
            }
        };

        let mut first_error = None;
        for cluster in clusters {
            let nodes = cluster.nodes();
            let enabled: BTreeSet<String> = nodes.iter().map(|node| node.name()).collect();
            let known: Vec<&str> = active
                .get(cluster.name())
                .map(|servers| servers.iter().filter_map(|s| s.get("svname")).map(String::as_str).collect())
                .unwrap_or_default();

            if !nodes.is_empty() && !active.contains_key(cluster.name()) {
                tracing::debug!(cluster = %cluster.name(), "New cluster added, restart required");
                self.require_restart();
            }
            if enabled.iter().any(|name| !known.contains(&name.as_str())) {
                tracing::debug!(cluster = %cluster.name(), "New node added to cluster, restart required");
                self.require_restart();
            }

            for server in known {
                let result = if enabled.contains(server) {
                    control.enable_server(cluster.name(), server).await
                } else {
                    control.disable_server(cluster.name(), server).await
                };

                match result {
                    Ok(reply) if reply.is_empty() => {}
                    Ok(reply) => {
                        tracing::error!(cluster = %cluster.name(), server = %server, reply = %reply, "Socket command failed");
                        self.require_restart();
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::error!(cluster = %cluster.name(), server = %server, error = %e, "Error when enabling/disabling server");
                        self.require_restart();
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(balancer = %self.name, "HAProxy servers synced");
                Ok(())
            }
        }
    }

    async fn restart(&self, state: &mut SyncState, version: Option<Version>) -> Result<(), ControlError> {
        let interval = Duration::from_millis(self.settings.load().restart_interval_ms);
        if let Some(last) = state.last_restart {
            let remaining = interval.saturating_sub(last.elapsed());
            if !remaining.is_zero() {
                tracing::debug!(delay_ms = remaining.as_millis() as u64, "Delaying restart");
                tokio::time::sleep(remaining).await;
            }
        }

        let result = self.control().restart(version, &Peer::current()).await;
        metrics::record_restart(result.is_ok());
        result?;

        state.last_restart = Some(Instant::now());
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.restart_required.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Balancer for HaProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        let settings = validate_haproxy(raw)?;
        if **self.settings.load() != settings {
            self.settings.store(Arc::new(settings));
        }
        Ok(())
    }

    async fn sync(&self, clusters: &[Arc<Cluster>]) -> Result<(), BalancerError> {
        let mut state = self.state.lock().await;
        tracing::info!(balancer = %self.name, clusters = clusters.len(), "Updating HAProxy config file");

        if !self.restart_required() {
            if let Err(e) = self.sync_nodes(clusters).await {
                tracing::warn!(balancer = %self.name, error = %e, "Live sync failed, falling back to restart");
                self.require_restart();
            }
        }

        let control = self.control();
        let version = control.version().await;

        let settings = self.settings.load_full();
        let content = config::generate(&settings, clusters, version, Utc::now());
        tokio::fs::write(&settings.config_file, content)
            .await
            .map_err(|source| BalancerError::WriteConfig {
                path: settings.config_file.clone(),
                source,
            })?;

        if self.restart_required() {
            self.restart(&mut state, version).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HaProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaProxy")
            .field("name", &self.name)
            .field("restart_required", &self.restart_required())
            .finish()
    }
}
