#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use botfleet::registry::{NewClient, ProviderCredentials};
use botfleet::supervisor::{RestartPolicy, SupervisorSettings, WorkerPaths};
use botfleet::types::ProviderKind;

/// Builder for `NewClient` to simplify test setup.
pub struct NewClientBuilder {
    client: NewClient,
}

impl NewClientBuilder {
    pub fn new(id: &str, port: u16) -> Self {
        Self {
            client: NewClient::new(id, port, format!("Client {id}")),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.client.display_name = name.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.client.active = false;
        self
    }

    pub fn webhook(mut self, url: &str) -> Self {
        self.client.webhook_base_url = Some(url.to_string());
        self
    }

    /// Business-API client with valid dummy credentials.
    pub fn business_api(mut self) -> Self {
        self.client.provider_kind = ProviderKind::BusinessApi;
        self.client.provider_credentials = Some(ProviderCredentials {
            access_token: "EAAG-test-token".to_string(),
            account_id: "1098765432".to_string(),
            verify_token: "verify-me".to_string(),
            api_version: "v21.0".to_string(),
        });
        self
    }

    pub fn build(self) -> NewClient {
        self.client
    }
}

/// Supervisor settings with short timings, rooted at `storage`.
pub fn fast_settings(storage: &Path) -> SupervisorSettings {
    SupervisorSettings {
        storage_path: storage.to_path_buf(),
        worker_paths: WorkerPaths::default(),
        restart: RestartPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        },
        stop_grace_period: Duration::from_millis(200),
        restart_pause: Duration::ZERO,
        manager_port: 4000,
    }
}
