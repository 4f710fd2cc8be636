// src/registry/validate.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{FleetError, Result};
use crate::registry::model::{ClientConfig, NewClient, ProviderCredentials};
use crate::types::ProviderKind;

/// Lowest port a worker may bind.
pub const MIN_CLIENT_PORT: u16 = 1024;

// Ids double as directory names under the storage root.
static CLIENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("client id pattern compiles"));

pub fn validate_new_client(client: &NewClient) -> Result<()> {
    validate_fields(
        &client.id,
        client.port,
        &client.display_name,
        client.provider_kind,
        client.webhook_base_url.as_deref(),
        client.provider_credentials.as_ref(),
    )
}

pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    validate_fields(
        &config.id,
        config.port,
        &config.display_name,
        config.provider_kind,
        config.webhook_base_url.as_deref(),
        config.provider_credentials.as_ref(),
    )
}

fn validate_fields(
    id: &str,
    port: u16,
    display_name: &str,
    provider_kind: ProviderKind,
    webhook_base_url: Option<&str>,
    credentials: Option<&ProviderCredentials>,
) -> Result<()> {
    if !CLIENT_ID_RE.is_match(id) {
        return Err(FleetError::InvalidConfig(format!(
            "client id '{id}' must be 1-64 characters of [A-Za-z0-9_-]"
        )));
    }

    if port < MIN_CLIENT_PORT {
        return Err(FleetError::InvalidConfig(format!(
            "port must be between {MIN_CLIENT_PORT} and 65535 (got {port})"
        )));
    }

    if display_name.trim().is_empty() {
        return Err(FleetError::InvalidConfig(
            "displayName must not be empty".to_string(),
        ));
    }

    if let Some(url) = webhook_base_url {
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FleetError::InvalidConfig(format!(
                "webhookBaseUrl must be an http(s) URL (got '{url}')"
            )));
        }
    }

    if provider_kind == ProviderKind::BusinessApi {
        let creds = credentials.ok_or_else(|| {
            FleetError::InvalidConfig(
                "providerCredentials are required for providerKind businessApi".to_string(),
            )
        })?;
        validate_credentials(creds)?;
    }

    Ok(())
}

fn validate_credentials(creds: &ProviderCredentials) -> Result<()> {
    let required = [
        ("accessToken", &creds.access_token),
        ("accountId", &creds.account_id),
        ("verifyToken", &creds.verify_token),
        ("apiVersion", &creds.api_version),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(FleetError::InvalidConfig(format!(
                "providerCredentials.{field} must not be empty"
            )));
        }
    }

    if !creds.account_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(FleetError::InvalidConfig(format!(
            "providerCredentials.accountId must be numeric (got '{}')",
            creds.account_id
        )));
    }

    Ok(())
}
