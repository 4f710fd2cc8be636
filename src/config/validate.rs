// src/config/validate.rs

use std::path::Path;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ManagerConfig, RawConfigFile, RawDuration};
use crate::errors::{FleetError, Result};
use crate::supervisor::WorkerPaths;

impl TryFrom<RawConfigFile> for ManagerConfig {
    type Error = FleetError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let manager = raw.manager;
        let supervisor = raw.supervisor;
        let worker = raw.worker;

        if manager.port == 0 {
            return Err(FleetError::ConfigError(
                "[manager].port must be non-zero".to_string(),
            ));
        }
        ensure_path("[manager].storage_path", &manager.storage_path)?;
        ensure_path("[manager].clients_path", &manager.clients_path)?;
        ensure_path("[worker].standard_path", &worker.standard_path)?;
        ensure_path("[worker].business_api_path", &worker.business_api_path)?;

        let config = ManagerConfig {
            port: manager.port,
            storage_path: manager.storage_path,
            clients_path: manager.clients_path,
            auto_start: manager.auto_start,
            startup_stagger: duration("[manager].startup_stagger", &manager.startup_stagger)?,
            health_check_interval: positive_duration(
                "[supervisor].health_check_interval",
                &supervisor.health_check_interval,
            )?,
            max_restart_attempts: supervisor.max_restart_attempts,
            restart_base_delay: positive_duration(
                "[supervisor].restart_base_delay",
                &supervisor.restart_base_delay,
            )?,
            stop_grace_period: positive_duration(
                "[supervisor].stop_grace_period",
                &supervisor.stop_grace_period,
            )?,
            restart_pause: duration("[supervisor].restart_pause", &supervisor.restart_pause)?,
            worker_paths: WorkerPaths {
                standard: worker.standard_path,
                business_api: worker.business_api_path,
            },
        };
        Ok(config)
    }
}

fn ensure_path(key: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(FleetError::ConfigError(format!("{key} must not be empty")));
    }
    Ok(())
}

fn duration(key: &str, raw: &RawDuration) -> Result<Duration> {
    match raw {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(*ms)),
        RawDuration::Text(s) => {
            parse_duration(s).map_err(|e| FleetError::ConfigError(format!("{key}: {e}")))
        }
    }
}

fn positive_duration(key: &str, raw: &RawDuration) -> Result<Duration> {
    let value = duration(key, raw)?;
    if value.is_zero() {
        return Err(FleetError::ConfigError(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
