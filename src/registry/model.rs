// src/registry/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProviderKind;

/// Version tag written at the top of the registry file.
pub const REGISTRY_VERSION: &str = "1.0.0";

/// API version used for business-API workers when none is configured.
pub const DEFAULT_API_VERSION: &str = "v21.0";

/// On-disk layout of the registry file:
///
/// ```json
/// {
///   "version": "1.0.0",
///   "clients": [
///     { "id": "900123", "port": 4100, "displayName": "Acme", "active": true, ... }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub version: String,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl RegistryFile {
    pub fn empty() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            clients: Vec::new(),
        }
    }
}

/// Credentials for token based providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub access_token: String,
    /// Numeric account (phone number) id.
    pub account_id: String,
    /// Token the provider echoes back when verifying the webhook.
    pub verify_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

/// Durable configuration of one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Business identifier. Immutable once created.
    pub id: String,
    pub port: u16,
    pub display_name: String,
    #[serde(default)]
    pub provider_kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_credentials: Option<ProviderCredentials>,
    /// Whether the orchestrator should keep this client's worker running.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `ClientRegistry::add`. Timestamps are assigned by the registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub id: String,
    pub port: u16,
    pub display_name: String,
    #[serde(default)]
    pub provider_kind: ProviderKind,
    #[serde(default)]
    pub webhook_base_url: Option<String>,
    #[serde(default)]
    pub provider_credentials: Option<ProviderCredentials>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NewClient {
    pub fn new(id: impl Into<String>, port: u16, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port,
            display_name: display_name.into(),
            provider_kind: ProviderKind::Standard,
            webhook_base_url: None,
            provider_credentials: None,
            active: true,
        }
    }

    pub(crate) fn into_config(self, now: DateTime<Utc>) -> ClientConfig {
        ClientConfig {
            id: self.id,
            port: self.port,
            display_name: self.display_name,
            provider_kind: self.provider_kind,
            webhook_base_url: self.webhook_base_url,
            provider_credentials: self.provider_credentials,
            active: self.active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for `ClientRegistry::update`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    pub port: Option<u16>,
    pub display_name: Option<String>,
    pub provider_kind: Option<ProviderKind>,
    pub webhook_base_url: Option<String>,
    pub provider_credentials: Option<ProviderCredentials>,
    pub active: Option<bool>,
}

impl ClientPatch {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref name) = self.display_name {
            config.display_name = name.clone();
        }
        if let Some(kind) = self.provider_kind {
            config.provider_kind = kind;
        }
        if let Some(ref url) = self.webhook_base_url {
            config.webhook_base_url = if url.is_empty() {
                None
            } else {
                Some(url.clone())
            };
        }
        if let Some(ref creds) = self.provider_credentials {
            config.provider_credentials = Some(creds.clone());
        }
        if let Some(active) = self.active {
            config.active = active;
        }
    }
}
