//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::{ConfigError, RawConfig};

const EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// True if the path has one of the supported config extensions.
pub fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Item name for a config file: its stem (`clusters/web.yaml` → `web`).
pub fn item_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.starts_with('.'))
        .map(str::to_string)
}

/// Load a config file into a generic map, choosing the parser by extension.
pub fn load_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value: serde_json::Value = match extension {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        "json" => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        "toml" => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Err(parse_err("file is empty".to_string())),
        other => Err(parse_err(format!("expected a mapping at top level, got {}", other))),
    }
}
