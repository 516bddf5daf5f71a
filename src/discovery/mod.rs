//! Discovery subsystem: cluster membership through a coordination service.
//!
//! # Data Flow
//! ```text
//! Reporter:
//!     Service port transition
//!     → Discovery::report_up / report_down
//!     → ephemeral record at <base>/<service>/<host:port>
//!
//! Writer:
//!     Discovery::start_watching(cluster)
//!     → child watch on <base>/<cluster>
//!     → Cluster::set_nodes (wholesale)
//!     → "membership changed" notify → balancer sync
//! ```
//!
//! # Connection States
//! ```text
//! Disconnected ──connect──▶ Connecting ──session up──▶ Connected
//!                               ▲                          │
//!                               └── suspended / lost ──────┘
//! ```
//! Every publish and watch suspends until `Connected` or shutdown.

pub mod coordination;
pub mod memory;
pub mod watcher;
pub mod zookeeper;

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::{ConfigError, Configurable, RawConfig};
use crate::plugins::Plugins;
use crate::topology::{Cluster, Service};

pub use coordination::{CoordinationClient, CoordinationError};
pub use memory::{MemoryClient, MemoryEnsemble};
pub use watcher::MembershipWatcher;
pub use zookeeper::ZookeeperClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// Shutdown fired while waiting for the connection.
    #[error("shutting down")]
    ShuttingDown,

    /// The coordination client went away.
    #[error("coordination client closed")]
    Closed,
}

/// A discovery method.
#[async_trait]
pub trait Discovery: Send + Sync {
    fn name(&self) -> &str;

    /// Reconfigure in place. A changed base path re-arms every active watch.
    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError>;

    fn connection_state(&self) -> ConnectionState;

    async fn connect(&self) -> Result<(), DiscoveryError>;

    async fn disconnect(&self);

    /// Watch a cluster's membership until `stop_watching` or `stop`.
    ///
    /// Runs for the lifetime of the watch; callers spawn it as a task.
    /// `changed` is notified after every refresh of `cluster.nodes`.
    async fn start_watching(&self, cluster: Arc<Cluster>, changed: Arc<Notify>);

    async fn stop_watching(&self, cluster: &str);

    /// Publish this machine's node for `service:port`.
    async fn report_up(&self, service: &Service, port: u16) -> Result<(), DiscoveryError>;

    /// Retract this machine's node for `service:port`. Idempotent.
    async fn report_down(&self, service: &Service, port: u16) -> Result<(), DiscoveryError>;

    /// Release waiters, end all watches and disconnect.
    async fn stop(&self);
}

/// Registry item wrapping a configured discovery method.
pub struct DiscoveryMethod {
    name: String,
    inner: Arc<dyn Discovery>,
    raw: ArcSwap<RawConfig>,
}

impl DiscoveryMethod {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Discovery>, raw: RawConfig) -> Self {
        Self {
            name: name.into(),
            inner,
            raw: ArcSwap::from_pointee(raw),
        }
    }

    pub fn discovery(&self) -> Arc<dyn Discovery> {
        self.inner.clone()
    }
}

impl Configurable for DiscoveryMethod {
    const KIND: &'static str = "discovery method";
    const SUBDIRECTORY: &'static str = "discovery";

    fn validate_config(name: &str, raw: &RawConfig, plugins: &Plugins) -> Result<(), ConfigError> {
        (plugins.discovery(name)?.validate)(raw)
    }

    fn from_config(name: &str, raw: &RawConfig, plugins: &Arc<Plugins>) -> Result<Self, ConfigError> {
        let plugin = plugins.discovery(name)?;
        (plugin.validate)(raw)?;
        let inner = (plugin.create)(name, raw)?;
        Ok(Self::new(name, inner, raw.clone()))
    }

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        self.inner.apply_config(raw)?;
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
