//! Configuration validation.
//!
//! # Responsibilities
//! - Reject files missing required keys with a message naming the key
//! - Check value ranges serde cannot express (rise/fall > 0, absolute paths)
//! - Run before an item is created or reconfigured
//!
//! # Design Decisions
//! - Validation is a pure function of the raw map
//! - Typed parsing happens afterwards, so these checks stay structural

use serde_json::Value;

use crate::config::schema::{ClusterSettings, HaproxySettings, DiscoverySettings, ServiceSettings};
use crate::config::{parse, ConfigError, RawConfig};

/// Look up a required key.
pub fn require<'a>(raw: &'a RawConfig, key: &str) -> Result<&'a Value, ConfigError> {
    raw.get(key)
        .filter(|value| !value.is_null())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn require_map<'a>(raw: &'a RawConfig, key: &str) -> Result<&'a RawConfig, ConfigError> {
    require(raw, key)?
        .as_object()
        .ok_or_else(|| ConfigError::invalid(key, "expected a mapping"))
}

fn positive_count(raw: &RawConfig, key: &str) -> Result<usize, ConfigError> {
    match require(raw, key)?.as_u64() {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(ConfigError::invalid(key, "expected a positive integer")),
    }
}

pub fn validate_cluster(raw: &RawConfig) -> Result<ClusterSettings, ConfigError> {
    require(raw, "discovery")?;
    require_map(raw, "haproxy")?;
    parse(raw)
}

pub fn validate_service(raw: &RawConfig) -> Result<ServiceSettings, ConfigError> {
    require(raw, "discovery")?;
    if require(raw, "port").is_err() && require(raw, "ports").is_err() {
        return Err(ConfigError::Missing("port".to_string()));
    }
    let checks = require_map(raw, "checks")?;
    if !checks.contains_key("interval") {
        return Err(ConfigError::Missing("checks.interval".to_string()));
    }
    ServiceSettings::from_raw(raw)
}

/// Hysteresis keys shared by every check; returns `(rise, fall)`.
pub fn validate_check(raw: &RawConfig) -> Result<(usize, usize), ConfigError> {
    Ok((positive_count(raw, "rise")?, positive_count(raw, "fall")?))
}

pub fn validate_discovery(raw: &RawConfig) -> Result<DiscoverySettings, ConfigError> {
    require(raw, "hosts")?;
    require(raw, "path")?;
    let settings: DiscoverySettings = parse(raw)?;
    if !settings.path.starts_with('/') || (settings.path.len() > 1 && settings.path.ends_with('/')) {
        return Err(ConfigError::invalid("path", "expected an absolute path without trailing slash"));
    }
    Ok(settings)
}

pub fn validate_haproxy(raw: &RawConfig) -> Result<HaproxySettings, ConfigError> {
    require(raw, "config_file")?;
    require(raw, "socket_file")?;

    if let Some(stats) = raw.get("stats").and_then(Value::as_object) {
        if !stats.contains_key("port") {
            return Err(ConfigError::Missing("stats.port".to_string()));
        }
    }

    if let Some(proxies) = raw.get("proxies").and_then(Value::as_object) {
        for (name, proxy) in proxies {
            let proxy = proxy
                .as_object()
                .ok_or_else(|| ConfigError::invalid(format!("proxies.{}", name), "expected a mapping"))?;
            for key in ["port", "upstreams"] {
                if !proxy.contains_key(key) {
                    return Err(ConfigError::Missing(format!("proxies.{}.{}", name, key)));
                }
            }
            let upstreams = proxy["upstreams"].as_array().map(Vec::as_slice).unwrap_or_default();
            for upstream in upstreams {
                for key in ["host", "port"] {
                    if upstream.get(key).is_none() {
                        return Err(ConfigError::Missing(format!("proxies.{}.upstreams[].{}", name, key)));
                    }
                }
            }
        }
    }

    parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawConfig {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cluster_requires_discovery_and_balancer_block() {
        let err = validate_cluster(&raw(json!({"haproxy": {"port": 80}}))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == "discovery"));

        let err = validate_cluster(&raw(json!({"discovery": "memory"}))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == "haproxy"));

        let settings = validate_cluster(&raw(json!({
            "discovery": "memory",
            "haproxy": {"port": 8000, "backend": ["mode http"]}
        })))
        .unwrap();
        assert_eq!(settings.haproxy.port, Some(8000));
    }

    #[test]
    fn test_check_rise_fall() {
        assert_eq!(validate_check(&raw(json!({"rise": 2, "fall": 3}))).unwrap(), (2, 3));
        assert!(matches!(
            validate_check(&raw(json!({"fall": 3}))),
            Err(ConfigError::Missing(key)) if key == "rise"
        ));
        assert!(matches!(
            validate_check(&raw(json!({"rise": 0, "fall": 3}))),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_haproxy_nested_requirements() {
        let base = json!({"config_file": "/tmp/h.cfg", "socket_file": "/tmp/h.sock"});
        assert!(validate_haproxy(&raw(base.clone())).is_ok());

        let mut with_stats = raw(base.clone());
        with_stats.insert("stats".into(), json!({"uri": "/stats"}));
        assert!(matches!(validate_haproxy(&with_stats), Err(ConfigError::Missing(key)) if key == "stats.port"));

        let mut with_proxy = raw(base);
        with_proxy.insert("proxies".into(), json!({"ext": {"port": 9000, "upstreams": [{"host": "10.0.0.1"}]}}));
        assert!(matches!(validate_haproxy(&with_proxy), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_discovery_path() {
        assert!(validate_discovery(&raw(json!({"hosts": ["a:2181"], "path": "/hm"}))).is_ok());
        assert!(validate_discovery(&raw(json!({"hosts": ["a:2181"], "path": "hm"}))).is_err());
        assert!(validate_discovery(&raw(json!({"path": "/hm"}))).is_err());
    }
}
