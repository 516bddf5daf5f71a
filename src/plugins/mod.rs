//! Name → constructor tables for balancers, discovery methods and checks.
//!
//! Built once at startup and shared read-only. A config file's stem names
//! the balancer or discovery plugin it configures; a service's check keys
//! name check plugins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::balancer::haproxy::HaProxy;
use crate::balancer::Balancer;
use crate::config::validation::{validate_haproxy, validate_discovery};
use crate::config::{ConfigError, RawConfig};
use crate::discovery::{Discovery, MembershipWatcher, MemoryEnsemble, ZookeeperClient};
use crate::health::http::HttpProbe;
use crate::health::redis::RedisProbe;
use crate::health::tcp::TcpProbe;
use crate::health::{HealthCheck, Probe};

pub type Validator = fn(&RawConfig) -> Result<(), ConfigError>;

pub type Constructor<T> = Box<dyn Fn(&str, &RawConfig) -> Result<Arc<T>, ConfigError> + Send + Sync>;

pub struct BalancerPlugin {
    pub validate: Validator,
    pub create: Constructor<dyn Balancer>,
}

pub struct DiscoveryPlugin {
    pub validate: Validator,
    pub create: Constructor<dyn Discovery>,
}

pub struct CheckPlugin {
    pub create: fn() -> Box<dyn Probe>,
}

#[derive(Default)]
pub struct Plugins {
    balancers: BTreeMap<String, BalancerPlugin>,
    discovery: BTreeMap<String, DiscoveryPlugin>,
    checks: BTreeMap<String, CheckPlugin>,
}

impl Plugins {
    /// The built-in set: `haproxy`, `zookeeper`, `memory`, `tcp`, `http` and `redis`.
    ///
    /// Every `memory` discovery method opens its own session on `ensemble`,
    /// which only reaches roles running in this process.
    pub fn builtin(ensemble: Arc<MemoryEnsemble>) -> Self {
        let mut plugins = Self::default();

        plugins.register_balancer(
            "haproxy",
            BalancerPlugin {
                validate: |raw| validate_haproxy(raw).map(|_| ()),
                create: Box::new(|name: &str, raw: &RawConfig| -> Result<Arc<dyn Balancer>, ConfigError> {
                    Ok(Arc::new(HaProxy::new(name, validate_haproxy(raw)?)))
                }),
            },
        );

        plugins.register_discovery(
            "memory",
            DiscoveryPlugin {
                validate: |raw| validate_discovery(raw).map(|_| ()),
                create: Box::new(move |name: &str, raw: &RawConfig| -> Result<Arc<dyn Discovery>, ConfigError> {
                    let settings = validate_discovery(raw)?;
                    Ok(Arc::new(MembershipWatcher::new(name, Arc::new(ensemble.client()), settings)))
                }),
            },
        );

        plugins.register_discovery(
            "zookeeper",
            DiscoveryPlugin {
                validate: |raw| validate_discovery(raw).map(|_| ()),
                create: Box::new(|name: &str, raw: &RawConfig| -> Result<Arc<dyn Discovery>, ConfigError> {
                    let settings = validate_discovery(raw)?;
                    let client = ZookeeperClient::new(Duration::from_millis(settings.session_timeout_ms));
                    Ok(Arc::new(MembershipWatcher::new(name, Arc::new(client), settings)))
                }),
            },
        );

        plugins.register_check("tcp", CheckPlugin {
            create: || -> Box<dyn Probe> { Box::<TcpProbe>::default() },
        });
        plugins.register_check("http", CheckPlugin {
            create: || -> Box<dyn Probe> { Box::<HttpProbe>::default() },
        });
        plugins.register_check("redis", CheckPlugin {
            create: || -> Box<dyn Probe> { Box::<RedisProbe>::default() },
        });

        plugins
    }

    pub fn register_balancer(&mut self, name: &str, plugin: BalancerPlugin) {
        self.balancers.insert(name.to_string(), plugin);
    }

    pub fn register_discovery(&mut self, name: &str, plugin: DiscoveryPlugin) {
        self.discovery.insert(name.to_string(), plugin);
    }

    pub fn register_check(&mut self, name: &str, plugin: CheckPlugin) {
        self.checks.insert(name.to_string(), plugin);
    }

    pub fn balancer(&self, name: &str) -> Result<&BalancerPlugin, ConfigError> {
        self.balancers.get(name).ok_or_else(|| ConfigError::UnknownPlugin {
            kind: "balancer",
            name: name.to_string(),
        })
    }

    pub fn discovery(&self, name: &str) -> Result<&DiscoveryPlugin, ConfigError> {
        self.discovery.get(name).ok_or_else(|| ConfigError::UnknownPlugin {
            kind: "discovery method",
            name: name.to_string(),
        })
    }

    pub fn check(&self, name: &str) -> Result<&CheckPlugin, ConfigError> {
        self.checks.get(name).ok_or_else(|| ConfigError::UnknownPlugin {
            kind: "check",
            name: name.to_string(),
        })
    }

    /// Validate one check config: shared rise/fall keys plus type-specific keys.
    pub fn validate_check(&self, name: &str, raw: &RawConfig) -> Result<(), ConfigError> {
        let mut probe = (self.check(name)?.create)();
        crate::config::validation::validate_check(raw)?;
        probe.apply_check_config(raw)
    }

    pub fn new_check(&self, name: &str, host: &str, port: u16, raw: &RawConfig) -> Result<HealthCheck, ConfigError> {
        let probe = (self.check(name)?.create)();
        HealthCheck::from_config(name, host, port, raw, probe)
    }

    pub fn balancer_names(&self) -> impl Iterator<Item = &str> {
        self.balancers.keys().map(String::as_str)
    }
}
