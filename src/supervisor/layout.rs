// src/supervisor/layout.rs

//! Per-client storage layout and the worker launch contract.
//!
//! ```text
//! <storage>/<client id>/sessions/   provider session data
//! <storage>/<client id>/qr.png      latest pairing artifact
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::exec::LaunchSpec;
use crate::registry::ClientConfig;
use crate::types::ProviderKind;

const SESSION_DIR: &str = "sessions";
const QR_FILE: &str = "qr.png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.client_dir(id).join(SESSION_DIR)
    }

    pub fn qr_path(&self, id: &str) -> PathBuf {
        self.client_dir(id).join(QR_FILE)
    }
}

/// Worker executables, one per provider kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPaths {
    pub standard: PathBuf,
    pub business_api: PathBuf,
}

impl Default for WorkerPaths {
    fn default() -> Self {
        Self {
            standard: PathBuf::from("./workers/bot"),
            business_api: PathBuf::from("./workers/bot-business"),
        }
    }
}

impl WorkerPaths {
    pub fn for_kind(&self, kind: ProviderKind) -> &Path {
        match kind {
            ProviderKind::Standard => &self.standard,
            ProviderKind::BusinessApi => &self.business_api,
        }
    }
}

/// Environment a spawned worker receives.
pub fn worker_env(config: &ClientConfig, layout: &StorageLayout) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("BOT_ID", config.id.clone());
    set("BOT_PORT", config.port.to_string());
    set("BOT_NAME", config.display_name.clone());
    set("BOT_PROVIDER", config.provider_kind.to_string());
    set(
        "BOT_STORAGE_PATH",
        layout.client_dir(&config.id).display().to_string(),
    );
    set(
        "BOT_SESSION_PATH",
        layout.session_dir(&config.id).display().to_string(),
    );
    set("BOT_QR_PATH", layout.qr_path(&config.id).display().to_string());
    if let Some(url) = &config.webhook_base_url {
        set("BOT_WEBHOOK_URL", url.clone());
    }

    if config.provider_kind == ProviderKind::BusinessApi {
        if let Some(creds) = &config.provider_credentials {
            set("BUSINESS_ACCESS_TOKEN", creds.access_token.clone());
            set("BUSINESS_ACCOUNT_ID", creds.account_id.clone());
            set("BUSINESS_VERIFY_TOKEN", creds.verify_token.clone());
            set("BUSINESS_API_VERSION", creds.api_version.clone());
        }
    }

    env
}

pub fn launch_spec(config: &ClientConfig, layout: &StorageLayout, paths: &WorkerPaths) -> LaunchSpec {
    LaunchSpec {
        client_id: config.id.clone(),
        program: paths.for_kind(config.provider_kind).to_path_buf(),
        args: Vec::new(),
        env: worker_env(config, layout),
        working_dir: None,
    }
}
