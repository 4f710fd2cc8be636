// src/supervisor/management.rs

//! Registry + lifecycle compositions used by the management surface.

use tracing::{info, warn};

use crate::errors::Result;
use crate::registry::{ClientConfig, ClientPatch, NewClient};
use crate::supervisor::{BotInstance, Supervisor};

impl Supervisor {
    /// Register a client and, if requested and the client is active, start
    /// its worker. A failed start does not undo the registration; the
    /// returned instance carries the `ERROR` status instead.
    pub async fn create_client(
        &self,
        client: NewClient,
        auto_start: bool,
    ) -> Result<(ClientConfig, BotInstance)> {
        let config = self.inner.registry.add(client)?;

        if auto_start && config.active {
            if let Err(e) = self.start(&config.id).await {
                warn!(client = %config.id, error = %e, "auto-start of new client failed");
            }
        }

        let status = self.get_status(&config.id)?;
        Ok((config, status))
    }

    /// Apply `patch` to a client's configuration.
    ///
    /// Deactivation stops a running worker and drops any queued restart. A
    /// running worker is stopped then started again when its port changes.
    pub async fn update_client(&self, id: &str, patch: &ClientPatch) -> Result<ClientConfig> {
        let _guard = self.lock_client(id).await;

        let previous = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Self::not_found(id))?;
        let updated = self.inner.registry.update(id, patch)?;

        let port_changed = updated.port != previous.port;
        let deactivated = previous.active && !updated.active;
        if deactivated && self.state().cancel_pending_restart(id) {
            info!(client = %id, "client deactivated; pending restart cancelled");
        }
        let running = self.state().workers.contains_key(id);

        if running && (port_changed || deactivated) {
            info!(
                client = %id,
                port_changed,
                deactivated,
                "configuration change requires stopping the worker"
            );
            self.state().cancel_pending_restart(id);
            self.stop_locked(id).await?;

            if updated.active {
                self.start_locked(id).await?;
            }
        }

        Ok(updated)
    }

    /// Stop a client's worker and remove it from the registry.
    pub async fn remove_client(&self, id: &str) -> Result<ClientConfig> {
        let _guard = self.lock_client(id).await;
        if !self.inner.registry.exists(id) {
            return Err(Self::not_found(id));
        }

        self.state().cancel_pending_restart(id);
        self.stop_locked(id).await?;
        let removed = self.inner.registry.delete(id)?;
        self.state().forget(id);

        info!(client = %id, "client removed");
        Ok(removed)
    }

    /// Stop the worker, wipe its session and start it again so a fresh
    /// pairing flow begins.
    pub async fn reset_session(&self, id: &str) -> Result<BotInstance> {
        let _guard = self.lock_client(id).await;
        let config = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Self::not_found(id))?;

        self.state().cancel_pending_restart(id);
        self.stop_locked(id).await?;
        self.clear_session_locked(id)?;

        if !config.active {
            info!(client = %id, "session cleared; client inactive, not starting");
            return Ok(self.snapshot(&config));
        }
        self.start_locked(id).await
    }
}
