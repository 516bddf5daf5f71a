//! Balancer subsystem.
//!
//! A balancer turns the current cluster topology into its own configuration
//! and applies it. `sync` always receives the full list of clusters and
//! treats each cluster's node list as a snapshot.

pub mod haproxy;

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, Configurable, RawConfig};
use crate::plugins::Plugins;
use crate::topology::Cluster;

pub use haproxy::ControlError;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("balancer control error: {0}")]
    Control(#[from] ControlError),

    #[error("failed to write {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Balancer: Send + Sync {
    fn name(&self) -> &str;

    /// Reconfigure in place; idempotent.
    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError>;

    /// Regenerate and apply configuration for `clusters`.
    async fn sync(&self, clusters: &[Arc<Cluster>]) -> Result<(), BalancerError>;
}

/// Registry item wrapping a configured balancer.
pub struct BalancerHandle {
    name: String,
    inner: Arc<dyn Balancer>,
    raw: ArcSwap<RawConfig>,
}

impl BalancerHandle {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Balancer>, raw: RawConfig) -> Self {
        Self {
            name: name.into(),
            inner,
            raw: ArcSwap::from_pointee(raw),
        }
    }

    pub fn balancer(&self) -> Arc<dyn Balancer> {
        self.inner.clone()
    }
}

impl Configurable for BalancerHandle {
    const KIND: &'static str = "balancer";
    const SUBDIRECTORY: &'static str = "balancers";

    fn validate_config(name: &str, raw: &RawConfig, plugins: &Plugins) -> Result<(), ConfigError> {
        (plugins.balancer(name)?.validate)(raw)
    }

    fn from_config(name: &str, raw: &RawConfig, plugins: &Arc<Plugins>) -> Result<Self, ConfigError> {
        let plugin = plugins.balancer(name)?;
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
