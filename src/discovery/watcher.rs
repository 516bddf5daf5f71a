//! Membership watcher over a coordination client.
//!
//! Records live at `<base>/<cluster>/<node name>`; each holds a serialized
//! [`Node`] and exists only while the node is up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::schema::DiscoverySettings;
use crate::config::validation::validate_discovery;
use crate::config::{ConfigError, Configurable, RawConfig};
use crate::discovery::coordination::{join, CoordinationClient, CoordinationError, Op, SessionState};
use crate::discovery::{ConnectionState, Discovery, DiscoveryError};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::topology::{Cluster, Node, Service};

/// Retry interval while a cluster's record path does not exist yet.
pub const NO_NODE_INTERVAL: Duration = Duration::from_secs(2);

pub struct MembershipWatcher {
    name: String,
    client: Arc<dyn CoordinationClient>,
    settings: ArcSwap<DiscoverySettings>,
    /// Set between `connect` and `disconnect`.
    requested: AtomicBool,
    shutdown: Shutdown,
    /// cluster name → stop signal of its watch loop
    watches: DashMap<String, CancellationToken>,
    /// Bumped when the base path changes so every loop re-arms.
    generation: watch::Sender<u64>,
}

impl MembershipWatcher {
    pub fn new(name: impl Into<String>, client: Arc<dyn CoordinationClient>, settings: DiscoverySettings) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            name: name.into(),
            client,
            settings: ArcSwap::from_pointee(settings),
            requested: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            watches: DashMap::new(),
            generation,
        }
    }

    pub fn base_path(&self) -> String {
        self.settings.load().path.clone()
    }

    pub fn is_watching(&self, cluster: &str) -> bool {
        self.watches.contains_key(cluster)
    }

    fn cluster_path(&self, cluster: &str) -> String {
        join(&self.settings.load().path, cluster)
    }

    /// Suspend until the session is connected, the signal fires or shutdown.
    async fn wait_connected(&self, stop: &CancellationToken) -> Result<(), DiscoveryError> {
        let mut state = self.client.state();
        tokio::select! {
            result = state.wait_for(|s| *s == SessionState::Connected) => {
                result.map(|_| ()).map_err(|_| DiscoveryError::Closed)
            }
            _ = stop.cancelled() => Err(DiscoveryError::ShuttingDown),
        }
    }

    /// Decode every child record; bad ones are skipped.
    async fn read_nodes(&self, path: &str, children: &[String]) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            let child_path = join(path, child);
            match self.client.get(&child_path).await {
                Ok((data, _)) => match Node::deserialize(&data) {
                    Ok(node) => nodes.push(node),
                    Err(e) => tracing::warn!(path = %child_path, error = %e, "Invalid node record, skipping"),
                },
                Err(CoordinationError::NoNode(_)) => {
                    tracing::debug!(path = %child_path, "Node record vanished while reading");
                }
                Err(e) => tracing::warn!(path = %child_path, error = %e, "Failed to read node record"),
            }
        }
        nodes
    }

    async fn watch_loop(&self, cluster: &Cluster, changed: &Notify, stop: &CancellationToken) {
        let mut generation = self.generation.subscribe();
        let mut state = self.client.state();
        let mut backoff = Backoff::default();

        loop {
            if self.wait_connected(stop).await.is_err() {
                break;
            }
            state.borrow_and_update();
            generation.borrow_and_update();

            let path = self.cluster_path(cluster.name());
            let delay = match self.client.children(&path).await {
                Ok((children, trigger)) => {
                    backoff.reset();
                    let nodes = self.read_nodes(&path, &children).await;
                    tracing::debug!(cluster = %cluster.name(), path = %path, nodes = nodes.len(), "Cluster membership refreshed");
                    cluster.set_nodes(nodes);
                    changed.notify_one();

                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = trigger => {}
                        _ = state.changed() => {
                            tracing::debug!(cluster = %cluster.name(), "Session state changed, re-arming watch");
                        }
                        _ = generation.changed() => {
                            tracing::info!(cluster = %cluster.name(), "Base path changed, re-arming watch");
                        }
                    }
                    continue;
                }
                Err(CoordinationError::NoNode(_)) => {
                    tracing::debug!(cluster = %cluster.name(), path = %path, "Cluster path missing, retrying");
                    NO_NODE_INTERVAL
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(cluster = %cluster.name(), error = %e, delay_ms = delay.as_millis() as u64, "Watch failed, retrying");
                    delay
                }
            };

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl Discovery for MembershipWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        let settings = validate_discovery(raw)?;
        let old = self.settings.swap(Arc::new(settings));
        let new = self.settings.load();

        if old.hosts != new.hosts && self.requested.load(Ordering::SeqCst) {
            tracing::info!(discovery = %self.name, hosts = ?new.hosts, "Ensemble hosts updated");
        }
        if old.path != new.path {
            tracing::warn!(discovery = %self.name, old = %old.path, new = %new.path, "Base path changed, restarting watches");
            self.generation.send_modify(|generation| *generation += 1);
        }
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        if !self.requested.load(Ordering::SeqCst) {
            return ConnectionState::Disconnected;
        }
        match *self.client.state().borrow() {
            SessionState::Connected => ConnectionState::Connected,
            _ => ConnectionState::Connecting,
        }
    }

    async fn connect(&self) -> Result<(), DiscoveryError> {
        self.requested.store(true, Ordering::SeqCst);
        let hosts = self.settings.load().hosts.clone();
        tracing::info!(discovery = %self.name, hosts = ?hosts, "Connecting to coordination service");
        self.client.connect(&hosts).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        tracing::info!(discovery = %self.name, "Disconnecting from coordination service");
        self.requested.store(false, Ordering::SeqCst);
        self.client.close().await;
    }

    async fn start_watching(&self, cluster: Arc<Cluster>, changed: Arc<Notify>) {
        let stop = self.shutdown.child();
        if let Some(previous) = self.watches.insert(cluster.name().to_string(), stop.clone()) {
            previous.cancel();
        }
        tracing::info!(discovery = %self.name, cluster = %cluster.name(), "Watching cluster");

        self.watch_loop(&cluster, &changed, &stop).await;

        stop.cancel();
        self.watches.remove_if(cluster.name(), |_, token| token.is_cancelled());
        tracing::info!(discovery = %self.name, cluster = %cluster.name(), "Stopped watching cluster");
    }

    async fn stop_watching(&self, cluster: &str) {
        if let Some((_, stop)) = self.watches.remove(cluster) {
            stop.cancel();
        }
    }

    async fn report_up(&self, service: &Service, port: u16) -> Result<(), DiscoveryError> {
        self.wait_connected(&self.shutdown.subscribe()).await?;

        let node = Node::current(port, &service.settings().metadata);
        let path = join(&self.cluster_path(service.name()), &node.name());
        let data = node.serialize().into_bytes();

        match self.client.exists(&path).await? {
            None => {
                tracing::debug!(path = %path, "Creating node record");
                self.client.create(&path, data, true, true).await?;
            }
            Some(stat) if stat.ephemeral_owner != self.client.session_id() => {
                tracing::debug!(path = %path, "Node record owned by a stale session, recreating");
                self.client
                    .commit(vec![
                        Op::Delete { path: path.clone() },
                        Op::Create {
                            path: path.clone(),
                            data,
                            ephemeral: true,
                        },
                    ])
                    .await?;
            }
            Some(_) => {
                tracing::debug!(path = %path, "Updating node record");
                self.client.set(&path, data).await?;
            }
        }

        metrics::record_report("up");
        tracing::info!(service = %service.name(), port, "Reported up");
        Ok(())
    }

    async fn report_down(&self, service: &Service, port: u16) -> Result<(), DiscoveryError> {
        self.wait_connected(&self.shutdown.subscribe()).await?;

        let node = Node::current(port, &service.settings().metadata);
        let path = join(&self.cluster_path(service.name()), &node.name());

        match self.client.delete(&path).await {
            Ok(()) | Err(CoordinationError::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }

        metrics::record_report("down");
        tracing::info!(service = %service.name(), port, "Reported down");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.trigger();
        self.watches.clear();
        if self.requested.load(Ordering::SeqCst) {
            self.disconnect().await;
        }
    }
}
