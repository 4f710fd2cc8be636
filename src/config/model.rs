// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::supervisor::{RestartPolicy, SupervisorSettings, WorkerPaths};

/// Configuration file as read from TOML, before validation.
///
/// ```toml
/// [manager]
/// port = 4000
/// storage_path = "./storage"
/// clients_path = "./config/clients.json"
/// auto_start = true
/// startup_stagger = "1s"
///
/// [supervisor]
/// health_check_interval = "30s"
/// max_restart_attempts = 3
/// restart_base_delay = "5s"
/// stop_grace_period = "5s"
/// restart_pause = "2s"
///
/// [worker]
/// standard_path = "./workers/bot"
/// business_api_path = "./workers/bot-business"
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

/// A duration as written in config: `"250ms"`, `"3s"`, `"1m"`, `"2h"`, or a
/// bare integer number of milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Millis(u64),
    Text(String),
}

impl From<&str> for RawDuration {
    fn from(s: &str) -> Self {
        RawDuration::Text(s.to_string())
    }
}

/// `[manager]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_clients_path")]
    pub clients_path: PathBuf,
    /// Start every active client at boot.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Delay between consecutive boot-time starts.
    #[serde(default = "default_startup_stagger")]
    pub startup_stagger: RawDuration,
}

fn default_port() -> u16 {
    4000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_clients_path() -> PathBuf {
    PathBuf::from("./config/clients.json")
}

fn default_true() -> bool {
    true
}

fn default_startup_stagger() -> RawDuration {
    "1s".into()
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage_path: default_storage_path(),
            clients_path: default_clients_path(),
            auto_start: true,
            startup_stagger: default_startup_stagger(),
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: RawDuration,
    /// Automatic restarts allowed between two successful authentications.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Restart `n` waits `n × restart_base_delay`.
    #[serde(default = "default_restart_base_delay")]
    pub restart_base_delay: RawDuration,
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period: RawDuration,
    #[serde(default = "default_restart_pause")]
    pub restart_pause: RawDuration,
}

fn default_health_check_interval() -> RawDuration {
    "30s".into()
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_base_delay() -> RawDuration {
    "5s".into()
}

fn default_stop_grace_period() -> RawDuration {
    "5s".into()
}

fn default_restart_pause() -> RawDuration {
    "2s".into()
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_base_delay: default_restart_base_delay(),
            stop_grace_period: default_stop_grace_period(),
            restart_pause: default_restart_pause(),
        }
    }
}

/// `[worker]` section: one executable per provider kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    #[serde(default = "default_standard_path")]
    pub standard_path: PathBuf,
    #[serde(default = "default_business_api_path")]
    pub business_api_path: PathBuf,
}

fn default_standard_path() -> PathBuf {
    WorkerPaths::default().standard
}

fn default_business_api_path() -> PathBuf {
    WorkerPaths::default().business_api
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            standard_path: default_standard_path(),
            business_api_path: default_business_api_path(),
        }
    }
}

/// Validated configuration used by the rest of the application.
///
/// Construct via `ManagerConfig::try_from(raw)` (see `validate.rs`) or
/// [`crate::config::load_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub port: u16,
    pub storage_path: PathBuf,
    pub clients_path: PathBuf,
    pub auto_start: bool,
    pub startup_stagger: Duration,
    pub health_check_interval: Duration,
    pub max_restart_attempts: u32,
    pub restart_base_delay: Duration,
    pub stop_grace_period: Duration,
    pub restart_pause: Duration,
    pub worker_paths: WorkerPaths,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage_path: default_storage_path(),
            clients_path: default_clients_path(),
            auto_start: true,
            startup_stagger: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            max_restart_attempts: default_max_restart_attempts(),
            restart_base_delay: Duration::from_secs(5),
            stop_grace_period: Duration::from_secs(5),
            restart_pause: Duration::from_secs(2),
            worker_paths: WorkerPaths::default(),
        }
    }
}

impl ManagerConfig {
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            storage_path: self.storage_path.clone(),
            worker_paths: self.worker_paths.clone(),
            restart: RestartPolicy {
                max_attempts: self.max_restart_attempts,
                base_delay: self.restart_base_delay,
            },
            stop_grace_period: self.stop_grace_period,
            restart_pause: self.restart_pause,
            manager_port: self.port,
        }
    }
}
