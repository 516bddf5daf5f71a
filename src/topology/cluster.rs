//! Clusters: named node sets sharing a discovery method and balancer config.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ClusterSettings;
use crate::config::validation::validate_cluster;
use crate::config::{ConfigError, Configurable, RawConfig};
use crate::plugins::Plugins;
use crate::topology::Node;

pub struct Cluster {
    name: String,
    settings: ArcSwap<ClusterSettings>,
    raw: ArcSwap<RawConfig>,
    /// Replaced wholesale by the membership watcher, never patched.
    nodes: ArcSwap<Vec<Node>>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, settings: ClusterSettings) -> Self {
        Self {
            name: name.into(),
            settings: ArcSwap::from_pointee(settings),
            raw: ArcSwap::from_pointee(RawConfig::new()),
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn settings(&self) -> Arc<ClusterSettings> {
        self.settings.load_full()
    }

    pub fn discovery(&self) -> String {
        self.settings.load().discovery.clone()
    }

    /// Snapshot of the current members.
    pub fn nodes(&self) -> Arc<Vec<Node>> {
        self.nodes.load_full()
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        crate::observability::metrics::record_cluster_nodes(&self.name, nodes.len());
        self.nodes.store(Arc::new(nodes));
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("nodes", &self.nodes.load().len())
            .finish()
    }
}

impl Configurable for Cluster {
    const KIND: &'static str = "cluster";
    const SUBDIRECTORY: &'static str = "clusters";

    fn validate_config(_name: &str, raw: &RawConfig, plugins: &Plugins) -> Result<(), ConfigError> {
        let settings = validate_cluster(raw)?;
        plugins.discovery(&settings.discovery)?;
        Ok(())
    }

    fn from_config(name: &str, raw: &RawConfig, plugins: &Arc<Plugins>) -> Result<Self, ConfigError> {
        Self::validate_config(name, raw, plugins)?;
        let cluster = Self::new(name, validate_cluster(raw)?);
        cluster.raw.store(Arc::new(raw.clone()));
        Ok(cluster)
    }

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        let settings = validate_cluster(raw)?;
        self.settings.store(Arc::new(settings));
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
