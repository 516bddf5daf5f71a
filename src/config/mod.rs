//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! <config_dir>/<kind>/<name>.(yaml|yml|json|toml)
//!     → loader.rs (parse into a RawConfig map)
//!     → validation.rs (required keys, value ranges)
//!     → schema.rs (typed settings, serde defaults)
//!     → Configurable::from_config / apply_config
//!
//! On change:
//!     watcher.rs detects create/modify/remove
//!     → reload engine add/update/remove
//!     → item applies new settings in place (idempotent)
//! ```
//!
//! # Design Decisions
//! - Items are long-lived and reconfigured in place; identity survives reloads
//! - A file that fails to parse or validate leaves the previous state untouched
//! - Typed schemas carry defaults so minimal files stay valid

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::plugins::Plugins;

/// Generic string-keyed map a config file is parsed into.
pub type RawConfig = serde_json::Map<String, serde_json::Value>;

/// Errors raised while loading, validating or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file content is not well-formed.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// File extension is not one of the supported formats.
    #[error("unsupported config file format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A required option is absent.
    #[error("missing required option '{0}'")]
    Missing(String),

    /// An option is present but its value is unusable.
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    /// The named plugin is not registered.
    #[error("unknown {kind} '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    /// Typed deserialization of an otherwise valid map failed.
    #[error("schema error: {0}")]
    Schema(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Deserialize a raw map into a typed settings struct.
pub fn parse<T: DeserializeOwned>(raw: &RawConfig) -> Result<T, ConfigError> {
    Ok(serde_json::from_value(serde_json::Value::Object(raw.clone()))?)
}

/// An item kept in sync with a config file.
///
/// `apply_config` must be idempotent: applying the same map twice changes
/// nothing the second time.
pub trait Configurable: Send + Sync + 'static {
    /// Human readable item kind, used in logs.
    const KIND: &'static str;

    /// Subdirectory of the config dir holding files of this kind.
    const SUBDIRECTORY: &'static str;

    /// Check a raw map before it is used to create or reconfigure `name`.
    fn validate_config(name: &str, raw: &RawConfig, plugins: &Plugins) -> Result<(), ConfigError>;

    fn from_config(name: &str, raw: &RawConfig, plugins: &Arc<Plugins>) -> Result<Self, ConfigError>
    where
        Self: Sized;

    fn apply_config(&self, raw: &RawConfig) -> Result<(), ConfigError>;

    fn name(&self) -> &str;

    /// The most recently applied raw config.
    fn config(&self) -> RawConfig;
}
