//! Reporter role: runs service checks and publishes this machine's nodes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Configurable, RawConfig};
use crate::discovery::DiscoveryMethod;
use crate::orchestrator::Context;
use crate::reload::{Hooks, Registry, ReloadEngine};
use crate::topology::Service;

pub struct ReporterState {
    ctx: Context,
    discovery: Arc<Registry<DiscoveryMethod>>,
    services: Arc<Registry<Service>>,
}

fn check_task(service: &str) -> String {
    format!("check:{}", service)
}

impl ReporterState {
    /// One round of checks, reporting every port that changed.
    pub async fn check_round(&self, service: &Service) {
        let method_name = service.discovery();
        let Some(method) = self.discovery.get(&method_name) else {
            tracing::warn!(service = %service.name(), discovery = %method_name, "Service is using unknown or unavailable discovery");
            return;
        };
        let discovery = method.discovery();

        let (came_up, went_down) = service.run_checks().await;
        let mut failed = false;
        for port in came_up {
            tracing::debug!(service = %service.name(), port, "Reporting port up");
            if let Err(e) = discovery.report_up(service, port).await {
                tracing::error!(service = %service.name(), port, error = %e, "Could not report port up");
                failed = true;
            }
        }
        for port in went_down {
            tracing::debug!(service = %service.name(), port, "Reporting port down");
            if let Err(e) = discovery.report_down(service, port).await {
                tracing::error!(service = %service.name(), port, error = %e, "Could not report port down");
                failed = true;
            }
        }

        // Forget the statuses so the next round reports again.
        if failed {
            service.reset_status().await;
        }
    }

    async fn check_loop(self: Arc<Self>, service: Arc<Service>, stop: CancellationToken) {
        tracing::info!(service = %service.name(), "Starting check loop");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.check_round(&service) => {}
            }

            let interval = service.settings().check_interval;
            tracing::debug!(service = %service.name(), interval_ms = interval.as_millis() as u64, "Sleeping");
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!(service = %service.name(), "Check loop stopped");
    }
}

struct DiscoveryHooks(Arc<ReporterState>);

#[async_trait]
impl Hooks<DiscoveryMethod> for DiscoveryHooks {
    async fn on_add(&self, item: Arc<DiscoveryMethod>) -> crate::Result<()> {
        item.discovery().connect().await?;
        Ok(())
    }

    async fn on_update(&self, item: Arc<DiscoveryMethod>, _raw: RawConfig) -> crate::Result<()> {
        for service in self.0.services.values() {
            if service.discovery() == item.name() {
                service.reset_status().await;
            }
        }
        Ok(())
    }

    async fn on_remove(&self, item: Arc<DiscoveryMethod>) -> crate::Result<()> {
        item.discovery().stop().await;
        Ok(())
    }
}

struct ServiceHooks(Arc<ReporterState>);

#[async_trait]
impl Hooks<Service> for ServiceHooks {
    async fn on_add(&self, item: Arc<Service>) -> crate::Result<()> {
        let state = self.0.clone();
        self.0
            .ctx
            .tasks
            .spawn(check_task(item.name()), &self.0.ctx.shutdown.subscribe(), move |stop| {
                state.check_loop(item, stop)
            });
        Ok(())
    }

    async fn on_remove(&self, item: Arc<Service>) -> crate::Result<()> {
        self.0.ctx.tasks.stop(&check_task(item.name())).await;

        let up = item.up_ports().await;
        if up.is_empty() {
            return Ok(());
        }
        let Some(method) = self.0.discovery.get(&item.discovery()) else {
            tracing::warn!(service = %item.name(), "Discovery unavailable, cannot retract up ports");
            return Ok(());
        };
        for port in up {
            method.discovery().report_down(&item, port).await?;
        }
        Ok(())
    }
}

/// The reporter role.
pub struct Reporter {
    state: Arc<ReporterState>,
    discovery: Arc<ReloadEngine<DiscoveryMethod>>,
    services: Arc<ReloadEngine<Service>>,
    watches: Mutex<Vec<JoinHandle<()>>>,
}

impl Reporter {
    pub fn new(ctx: Context) -> Self {
        let state = Arc::new(ReporterState {
            ctx: ctx.clone(),
            discovery: Arc::new(Registry::new()),
            services: Arc::new(Registry::new()),
        });

        let discovery = ReloadEngine::new(
            &ctx.config_dir,
            state.discovery.clone(),
            Arc::new(DiscoveryHooks(state.clone())),
            ctx.plugins.clone(),
            ctx.pool.clone(),
        );
        let services = ReloadEngine::new(
            &ctx.config_dir,
            state.services.clone(),
            Arc::new(ServiceHooks(state.clone())),
            ctx.plugins.clone(),
            ctx.pool.clone(),
        );

        Self {
            state,
            discovery: Arc::new(discovery),
            services: Arc::new(services),
            watches: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> crate::Result<()> {
        tracing::info!(config_dir = ?self.state.ctx.config_dir, "Starting reporter");
        let shutdown = self.state.ctx.shutdown.subscribe();
        let mut watches = self.watches.lock().await;
        watches.push(self.discovery.watch(shutdown.clone())?);
        watches.push(self.services.watch(shutdown)?);
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("Stopping reporter");
        self.state.ctx.shutdown.trigger();
        self.state.ctx.wind_down(&self.watches, &self.state.discovery).await;
    }

    pub fn state(&self) -> &Arc<ReporterState> {
        &self.state
    }

    pub fn discovery(&self) -> &Arc<ReloadEngine<DiscoveryMethod>> {
        &self.discovery
    }

    pub fn services(&self) -> &Arc<ReloadEngine<Service>> {
        &self.services
    }

    pub fn is_checking(&self, service: &str) -> bool {
        self.state.ctx.tasks.contains(&check_task(service))
    }
}
