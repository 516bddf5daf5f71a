//! Writer role: keeps balancers in sync with cluster membership.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::balancer::BalancerHandle;
use crate::config::{Configurable, RawConfig};
use crate::discovery::DiscoveryMethod;
use crate::observability::metrics;
use crate::orchestrator::Context;
use crate::reload::{Hooks, Registry, ReloadEngine};
use crate::topology::Cluster;

pub struct WriterState {
    ctx: Context,
    balancers: Arc<Registry<BalancerHandle>>,
    discovery: Arc<Registry<DiscoveryMethod>>,
    clusters: Arc<Registry<Cluster>>,
    topology_changed: Arc<Notify>,
    /// cluster → discovery method currently watching it
    watched: DashMap<String, String>,
}

fn watch_task(cluster: &str) -> String {
    format!("watch:{}", cluster)
}

impl WriterState {
    fn changed(&self) {
        self.topology_changed.notify_one();
    }

    /// Start watching `cluster` with its configured discovery method.
    fn start_watch(&self, cluster: Arc<Cluster>) -> bool {
        let method_name = cluster.discovery();
        let Some(method) = self.discovery.get(&method_name) else {
            tracing::warn!(cluster = %cluster.name(), discovery = %method_name, "Discovery method unknown or unavailable");
            return false;
        };

        let name = cluster.name().to_string();
        tracing::info!(cluster = %name, discovery = %method_name, "Starting cluster watch");
        self.watched.insert(name.clone(), method_name);

        let discovery = method.discovery();
        let changed = self.topology_changed.clone();
        self.ctx.tasks.spawn(watch_task(&name), &self.ctx.shutdown.subscribe(), move |stop| async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = discovery.start_watching(cluster, changed) => {}
            }
        });
        true
    }

    async fn stop_watch(&self, cluster: &str) {
        if let Some((_, method_name)) = self.watched.remove(cluster) {
            tracing::info!(cluster = %cluster, discovery = %method_name, "Stopping cluster watch");
            if let Some(method) = self.discovery.get(&method_name) {
                method.discovery().stop_watching(cluster).await;
            }
        }
        self.ctx.tasks.stop(&watch_task(cluster)).await;
    }

    /// Sync every balancer against the current clusters.
    pub async fn sync_all(&self) {
        let clusters = self.clusters.values();
        for handle in self.balancers.values() {
            let result = handle.balancer().sync(&clusters).await;
            metrics::record_sync(handle.name(), result.is_ok());
            match result {
                Ok(()) => tracing::info!(balancer = %handle.name(), clusters = clusters.len(), "Balancer synced"),
                Err(e) => tracing::error!(balancer = %handle.name(), error = %e, "Balancer sync failed"),
            }
        }
    }

    /// Sleep until topology changes or shutdown; sync after each change.
    ///
    /// Changes arriving during a sync coalesce into one follow-up sync.
    async fn reconcile_loop(self: Arc<Self>) {
        let shutdown = self.ctx.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.topology_changed.notified() => {}
            }
            self.sync_all().await;
        }
        tracing::debug!("Reconcile loop stopped");
    }
}

struct BalancerHooks(Arc<WriterState>);

#[async_trait]
impl Hooks<BalancerHandle> for BalancerHooks {
    async fn on_add(&self, _item: Arc<BalancerHandle>) -> crate::Result<()> {
        self.0.changed();
        Ok(())
    }

    async fn on_update(&self, _item: Arc<BalancerHandle>, _raw: RawConfig) -> crate::Result<()> {
        self.0.changed();
        Ok(())
    }

    async fn on_remove(&self, item: Arc<BalancerHandle>) -> crate::Result<()> {
        if self.0.balancers.len() == 1 {
            tracing::error!(balancer = %item.name(), "CRITICAL: config file removed, it was the only balancer left");
        }
        Ok(())
    }
}

struct DiscoveryHooks(Arc<WriterState>);

#[async_trait]
impl Hooks<DiscoveryMethod> for DiscoveryHooks {
    async fn on_add(&self, item: Arc<DiscoveryMethod>) -> crate::Result<()> {
        item.discovery().connect().await?;

        for cluster in self.0.clusters.values() {
            if cluster.discovery() != item.name() {
                continue;
            }
            let already = self.0.watched.get(cluster.name()).is_some_and(|watcher| watcher.as_str() == item.name())
                && self.0.ctx.tasks.contains(&watch_task(cluster.name()));
            if !already {
                self.0.start_watch(cluster);
            }
        }
        self.0.changed();
        Ok(())
    }

    async fn on_remove(&self, item: Arc<DiscoveryMethod>) -> crate::Result<()> {
        let clusters: Vec<String> = self
            .0
            .watched
            .iter()
            .filter(|entry| entry.value() == item.name())
            .map(|entry| entry.key().clone())
            .collect();
        for cluster in clusters {
            self.0.stop_watch(&cluster).await;
        }
        item.discovery().stop().await;
        self.0.changed();
        Ok(())
    }
}

struct ClusterHooks(Arc<WriterState>);

#[async_trait]
impl Hooks<Cluster> for ClusterHooks {
    async fn on_add(&self, item: Arc<Cluster>) -> crate::Result<()> {
        self.0.start_watch(item);
        self.0.changed();
        Ok(())
    }

    async fn on_update(&self, item: Arc<Cluster>, _raw: RawConfig) -> crate::Result<()> {
        let current = self.0.watched.get(item.name()).map(|entry| entry.value().clone());
        let wanted = item.discovery();
        if current.as_deref() != Some(wanted.as_str()) {
            tracing::info!(
                cluster = %item.name(),
                from = ?current,
                to = %wanted,
                "Switching cluster discovery"
            );
            self.0.stop_watch(item.name()).await;
            self.0.start_watch(item);
        }
        self.0.changed();
        Ok(())
    }

    async fn on_remove(&self, item: Arc<Cluster>) -> crate::Result<()> {
        self.0.stop_watch(item.name()).await;
        Ok(())
    }

    fn removed(&self, _name: &str) {
        self.0.changed();
    }
}

/// The writer role.
pub struct Writer {
    state: Arc<WriterState>,
    balancers: Arc<ReloadEngine<BalancerHandle>>,
    discovery: Arc<ReloadEngine<DiscoveryMethod>>,
    clusters: Arc<ReloadEngine<Cluster>>,
    watches: Mutex<Vec<JoinHandle<()>>>,
}

impl Writer {
    pub fn new(ctx: Context) -> Self {
        let state = Arc::new(WriterState {
            ctx: ctx.clone(),
            balancers: Arc::new(Registry::new()),
            discovery: Arc::new(Registry::new()),
            clusters: Arc::new(Registry::new()),
            topology_changed: Arc::new(Notify::new()),
            watched: DashMap::new(),
        });

        let balancers = ReloadEngine::new(
            &ctx.config_dir,
            state.balancers.clone(),
            Arc::new(BalancerHooks(state.clone())),
            ctx.plugins.clone(),
            ctx.pool.clone(),
        );
        let discovery = ReloadEngine::new(
            &ctx.config_dir,
            state.discovery.clone(),
            Arc::new(DiscoveryHooks(state.clone())),
            ctx.plugins.clone(),
            ctx.pool.clone(),
        );
        let clusters = ReloadEngine::new(
            &ctx.config_dir,
            state.clusters.clone(),
            Arc::new(ClusterHooks(state.clone())),
            ctx.plugins.clone(),
            ctx.pool.clone(),
        );

        Self {
            state,
            balancers: Arc::new(balancers),
            discovery: Arc::new(discovery),
            clusters: Arc::new(clusters),
            watches: Mutex::new(Vec::new()),
        }
    }

    /// Load the config directory, start the reconcile loop and follow changes.
    pub async fn start(&self) -> crate::Result<()> {
        tracing::info!(config_dir = ?self.state.ctx.config_dir, "Starting writer");
        let loop_state = self.state.clone();
        self.state
            .ctx
            .tasks
            .spawn("reconcile", &self.state.ctx.shutdown.subscribe(), |_| loop_state.reconcile_loop());

        let shutdown = self.state.ctx.shutdown.subscribe();
        let mut watches = self.watches.lock().await;
        watches.push(self.balancers.watch(shutdown.clone())?);
        watches.push(self.discovery.watch(shutdown.clone())?);
        watches.push(self.clusters.watch(shutdown)?);
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("Stopping writer");
        self.state.ctx.shutdown.trigger();
        self.state.ctx.wind_down(&self.watches, &self.state.discovery).await;
    }

    pub fn state(&self) -> &Arc<WriterState> {
        &self.state
    }

    pub fn balancers(&self) -> &Arc<ReloadEngine<BalancerHandle>> {
        &self.balancers
    }

    pub fn discovery(&self) -> &Arc<ReloadEngine<DiscoveryMethod>> {
        &self.discovery
    }

    pub fn clusters(&self) -> &Arc<ReloadEngine<Cluster>> {
        &self.clusters
    }

    /// Whether `cluster` has a running watch task.
    pub fn is_watching(&self, cluster: &str) -> bool {
        self.state.ctx.tasks.contains(&watch_task(cluster))
    }
}
