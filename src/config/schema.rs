//! Configuration schema definitions.
//!
//! Typed views of the per-item config files. Raw maps are validated in
//! `validation.rs` first, then deserialized into these structs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{parse, ConfigError, RawConfig};

/// Settings of one cluster (`clusters/<name>.yaml`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClusterSettings {
    /// Name of the discovery method tracking this cluster's nodes.
    pub discovery: String,

    /// Shared frontend this cluster is dispatched from, if any.
    #[serde(default)]
    pub meta_cluster: Option<String>,

    /// HAProxy-specific directives for this cluster.
    pub haproxy: HaproxyClusterSettings,
}

/// Per-cluster HAProxy block.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HaproxyClusterSettings {
    /// Port of the dedicated frontend. Clusters without one get no frontend.
    pub port: Option<u16>,

    /// Extra frontend directive lines.
    pub frontend: Vec<String>,

    /// Extra backend directive lines.
    pub backend: Vec<String>,

    /// Options appended to every `server` line.
    pub server_options: String,

    /// ACL criterion used when dispatched from a meta-cluster frontend.
    pub acl: Option<String>,
}

/// Settings of a coordination-store discovery method (`memory`, `zookeeper`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DiscoverySettings {
    /// Ensemble member addresses.
    pub hosts: Vec<String>,

    /// Base path under which cluster records live.
    pub path: String,

    /// Requested session timeout; ephemeral records outlive a dead reporter by about this long.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

/// Settings of one locally run service (`services/<name>.yaml`).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Host the checks connect to.
    pub host: String,

    /// Ports as configured; invalid entries are skipped when resolved.
    pub configured_ports: Vec<serde_json::Value>,

    /// Discovery method the service reports to.
    pub discovery: String,

    /// Free-form metadata published with each node record.
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Delay between check rounds.
    pub check_interval: Duration,

    /// Check type name → check config.
    pub checks: BTreeMap<String, RawConfig>,
}

#[derive(Deserialize)]
struct ServiceFile {
    discovery: String,
    #[serde(default = "default_service_host")]
    host: String,
    #[serde(default)]
    port: Option<serde_json::Value>,
    #[serde(default)]
    ports: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    checks: RawConfig,
}

fn default_service_host() -> String {
    "127.0.0.1".to_string()
}

impl ServiceSettings {
    /// Build settings from an already validated raw map.
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let file: ServiceFile = parse(raw)?;

        let configured_ports = match (file.ports, file.port) {
            (Some(ports), _) => ports,
            (None, Some(port)) => vec![port],
            (None, None) => return Err(ConfigError::Missing("port".to_string())),
        };

        let mut check_interval = None;
        let mut checks = BTreeMap::new();
        for (name, value) in file.checks {
            if name == "interval" {
                check_interval = Some(interval_from(&value)?);
                continue;
            }
            match value {
                serde_json::Value::Object(map) => {
                    checks.insert(name, map);
                }
                _ => return Err(ConfigError::invalid(format!("checks.{}", name), "expected a mapping")),
            }
        }

        Ok(Self {
            host: file.host,
            configured_ports,
            discovery: file.discovery,
            metadata: file.metadata,
            check_interval: check_interval.ok_or_else(|| ConfigError::Missing("checks.interval".to_string()))?,
            checks,
        })
    }
}

fn interval_from(value: &serde_json::Value) -> Result<Duration, ConfigError> {
    value
        .as_f64()
        .filter(|secs| *secs > 0.0 && secs.is_finite())
        .map(Duration::from_secs_f64)
        .ok_or_else(|| ConfigError::invalid("checks.interval", "expected a positive number of seconds"))
}

/// Hysteresis settings shared by every check type.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct CheckSettings {
    /// Consecutive passes needed to become passing.
    pub rise: usize,

    /// Consecutive failures needed to stop passing.
    pub fall: usize,
}

/// Settings of the HAProxy balancer (`balancers/haproxy.yaml`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HaproxySettings {
    /// Where the generated config is written.
    pub config_file: PathBuf,

    /// Admin-level stats socket of the running process.
    pub socket_file: PathBuf,

    /// PID file written by the running process.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// HAProxy executable.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Minimum time between two restarts, in milliseconds.
    #[serde(default = "default_restart_interval_ms")]
    pub restart_interval_ms: u64,

    /// Address cluster frontends bind to (all interfaces when absent).
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Extra lines for the `global` stanza.
    #[serde(default)]
    pub global: Vec<String>,

    /// Extra lines for the `defaults` stanza.
    #[serde(default)]
    pub defaults: Vec<String>,

    /// Static TCP proxies, keyed by name.
    #[serde(default)]
    pub proxies: BTreeMap<String, ProxySettings>,

    /// Optional stats listener.
    #[serde(default)]
    pub stats: Option<StatsSettings>,

    /// Shared frontends, keyed by meta-cluster name.
    #[serde(default)]
    pub meta_clusters: BTreeMap<String, MetaClusterSettings>,
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/haproxy.pid")
}

fn default_binary() -> String {
    "haproxy".to_string()
}

fn default_restart_interval_ms() -> u64 {
    2000
}

/// A static `listen` proxy to fixed upstreams.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProxySettings {
    pub port: u16,
    pub upstreams: Vec<UpstreamSettings>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub bind_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub max_conn: Option<u32>,
}

/// Stats web listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StatsSettings {
    pub port: u16,
    #[serde(default = "default_stats_uri")]
    pub uri: String,
    #[serde(default)]
    pub timeouts: StatsTimeouts,
}

fn default_stats_uri() -> String {
    "/".to_string()
}

/// Stats listener timeouts in milliseconds.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StatsTimeouts {
    pub client: Option<u64>,
    pub connect: Option<u64>,
    pub server: Option<u64>,
}

/// Shared frontend dispatching to member clusters by ACL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetaClusterSettings {
    pub port: u16,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub bind_address: Option<String>,
}
