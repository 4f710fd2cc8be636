// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::{ManagerConfig, RawConfigFile, RawDuration};
use crate::errors::{FleetError, Result};

/// Load the raw TOML config from `path`. A missing file yields the defaults.
///
/// Only deserializes; see [`load_config`] for overrides and validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = ?path, "config file not found; using defaults");
        return Ok(RawConfigFile::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = ?path, "config file loaded");
    Ok(config)
}

/// Load `path`, apply environment overrides and validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<ManagerConfig> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `env` instead of the
/// process environment.
pub fn load_config_with_env(
    path: impl AsRef<Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ManagerConfig> {
    let mut raw = load_from_path(path)?;
    apply_env_overrides(&mut raw, env)?;
    ManagerConfig::try_from(raw)
}

/// Environment variables that override config file values.
///
/// | variable | key |
/// |---|---|
/// | `MANAGER_PORT` | `manager.port` |
/// | `STORAGE_PATH` | `manager.storage_path` |
/// | `CLIENTS_CONFIG` | `manager.clients_path` |
/// | `AUTO_START` | `manager.auto_start` |
/// | `HEALTH_CHECK_INTERVAL` | `supervisor.health_check_interval` |
/// | `MAX_RESTART_ATTEMPTS` | `supervisor.max_restart_attempts` |
/// | `WORKER_STANDARD_PATH` | `worker.standard_path` |
/// | `WORKER_BUSINESS_PATH` | `worker.business_api_path` |
pub fn apply_env_overrides(
    raw: &mut RawConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("MANAGER_PORT") {
        raw.manager.port = parse_env("MANAGER_PORT", &v)?;
    }
    if let Some(v) = get("STORAGE_PATH") {
        raw.manager.storage_path = PathBuf::from(v);
    }
    if let Some(v) = get("CLIENTS_CONFIG") {
        raw.manager.clients_path = PathBuf::from(v);
    }
    if let Some(v) = get("AUTO_START") {
        raw.manager.auto_start = parse_bool("AUTO_START", &v)?;
    }
    if let Some(v) = get("HEALTH_CHECK_INTERVAL") {
        raw.supervisor.health_check_interval = RawDuration::Text(v);
    }
    if let Some(v) = get("MAX_RESTART_ATTEMPTS") {
        raw.supervisor.max_restart_attempts = parse_env("MAX_RESTART_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("WORKER_STANDARD_PATH") {
        raw.worker.standard_path = PathBuf::from(v);
    }
    if let Some(v) = get("WORKER_BUSINESS_PATH") {
        raw.worker.business_api_path = PathBuf::from(v);
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| FleetError::ConfigError(format!("{key}={value}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(FleetError::ConfigError(format!(
            "{key}={value}: expected true or false"
        ))),
    }
}

/// Default config path when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("botfleet.toml")
}
