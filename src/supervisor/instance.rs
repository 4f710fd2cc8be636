// src/supervisor/instance.rs

//! Runtime view of one bot and of the whole fleet.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::ClientConfig;
use crate::supervisor::layout::StorageLayout;
use crate::types::BotStatus;

/// Live state of one worker, as reported through status queries.
///
/// Only the supervisor mutates these; callers always get a clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInstance {
    pub id: String,
    pub port: u16,
    pub display_name: String,
    pub status: BotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    pub qr_asset_path: PathBuf,
    pub session_storage_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl BotInstance {
    /// View synthesized for a registered client that has never been started.
    pub fn offline(config: &ClientConfig, layout: &StorageLayout) -> Self {
        Self {
            id: config.id.clone(),
            port: config.port,
            display_name: config.display_name.clone(),
            status: BotStatus::Offline,
            process_id: None,
            qr_asset_path: layout.qr_path(&config.id),
            session_storage_path: layout.session_dir(&config.id),
            last_error: None,
            started_at: None,
            authenticated_at: None,
        }
    }

    /// Fresh instance for a worker about to be spawned.
    pub fn starting(config: &ClientConfig, layout: &StorageLayout, now: DateTime<Utc>) -> Self {
        Self {
            status: BotStatus::Starting,
            started_at: Some(now),
            ..Self::offline(config, layout)
        }
    }

    /// Copy the mutable, registry-owned fields from `config`.
    pub fn refresh_from(&mut self, config: &ClientConfig) {
        self.port = config.port;
        self.display_name.clone_from(&config.display_name);
    }

    pub fn mark_offline(&mut self) {
        self.status = BotStatus::Offline;
        self.process_id = None;
    }

    /// Seconds since the current worker was started.
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at
            .filter(|_| self.status.is_active())
            .map(|t| (now - t).num_seconds().max(0))
    }
}

/// Fleet-wide summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetInfo {
    pub version: String,
    pub uptime_secs: u64,
    pub manager_port: u16,
    pub total_clients: usize,
    pub online_clients: usize,
    pub offline_clients: usize,
    pub by_status: BTreeMap<BotStatus, usize>,
}

impl FleetInfo {
    pub fn from_instances<'a>(
        instances: impl IntoIterator<Item = &'a BotInstance>,
        uptime_secs: u64,
        manager_port: u16,
    ) -> Self {
        let mut by_status = BTreeMap::new();
        let mut total = 0;
        for instance in instances {
            *by_status.entry(instance.status).or_insert(0) += 1;
            total += 1;
        }
        let online = by_status.get(&BotStatus::Online).copied().unwrap_or(0);

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            manager_port,
            total_clients: total,
            online_clients: online,
            offline_clients: total - online,
            by_status,
        }
    }
}
