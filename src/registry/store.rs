// src/registry/store.rs

//! Write-through client registry backed by a single JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};
use crate::fs::FileSystem;
use crate::registry::model::{ClientConfig, ClientPatch, NewClient, RegistryFile, REGISTRY_VERSION};
use crate::registry::validate::{validate_client_config, validate_new_client};

/// Port `next_available_port` starts scanning from when the caller has no
/// preference.
pub const DEFAULT_PORT_FLOOR: u16 = 3001;

#[derive(Debug, Clone, Default)]
struct RegistryState {
    /// Insertion order; also the order clients are started at boot.
    order: Vec<String>,
    clients: HashMap<String, ClientConfig>,
}

impl RegistryState {
    fn port_owner(&self, port: u16, exclude: Option<&str>) -> Option<&ClientConfig> {
        self.clients
            .values()
            .find(|c| c.port == port && Some(c.id.as_str()) != exclude)
    }

    fn ordered(&self) -> impl Iterator<Item = &ClientConfig> {
        self.order.iter().filter_map(|id| self.clients.get(id))
    }

    fn to_file(&self) -> RegistryFile {
        RegistryFile {
            version: REGISTRY_VERSION.to_string(),
            clients: self.ordered().cloned().collect(),
        }
    }
}

/// Single source of truth for tenant configuration.
///
/// Every mutation persists the whole registry before returning. If the
/// write fails the in-memory change is discarded, so memory and disk agree.
#[derive(Debug)]
pub struct ClientRegistry {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    state: Mutex<RegistryState>,
}

impl ClientRegistry {
    /// Load the registry from `path`, creating an empty one if the file does
    /// not exist yet.
    ///
    /// An unparsable file, or one holding an invalid record, is a fatal boot
    /// error (`CorruptRegistry`); it is never silently replaced.
    pub fn load_all(path: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !fs.exists(&path) {
            let empty = serde_json::to_vec_pretty(&RegistryFile::empty())?;
            fs.write_atomic(&path, &empty)?;
            info!(path = ?path, "created empty client registry");
        }

        let contents = fs.read_to_string(&path)?;
        let file: RegistryFile =
            serde_json::from_str(&contents).map_err(|e| FleetError::CorruptRegistry {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut state = RegistryState::default();
        for client in file.clients {
            if let Err(e) = validate_client_config(&client) {
                return Err(FleetError::CorruptRegistry {
                    path,
                    reason: format!("client '{}': {e}", client.id),
                });
            }
            if state.clients.contains_key(&client.id) {
                return Err(FleetError::CorruptRegistry {
                    path,
                    reason: format!("duplicate client id '{}'", client.id),
                });
            }
            if let Some(owner) = state.port_owner(client.port, None) {
                warn!(
                    client = %client.id,
                    other = %owner.id,
                    port = client.port,
                    "registry contains two clients on the same port"
                );
            }
            state.order.push(client.id.clone());
            state.clients.insert(client.id.clone(), client);
        }

        info!(
            count = state.clients.len(),
            path = ?path,
            version = %file.version,
            "loaded client registry"
        );

        Ok(Self {
            path,
            fs,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &RegistryState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&state.to_file())?;
        self.fs.write_atomic(&self.path, &bytes)?;
        debug!(path = ?self.path, clients = state.clients.len(), "registry persisted");
        Ok(())
    }

    /// Add a new client.
    pub fn add(&self, client: NewClient) -> Result<ClientConfig> {
        validate_new_client(&client)?;

        let mut state = self.state();
        if state.clients.contains_key(&client.id) {
            return Err(FleetError::DuplicateId(client.id));
        }
        if let Some(owner) = state.port_owner(client.port, None) {
            return Err(FleetError::PortInUse {
                port: client.port,
                owner: owner.id.clone(),
            });
        }

        let config = client.into_config(Utc::now());

        let mut next = state.clone();
        next.order.push(config.id.clone());
        next.clients.insert(config.id.clone(), config.clone());
        self.persist(&next)?;
        *state = next;

        info!(client = %config.id, name = %config.display_name, port = config.port, "client added");
        Ok(config)
    }

    /// Apply a partial update. `id` and `created_at` never change.
    pub fn update(&self, id: &str, patch: &ClientPatch) -> Result<ClientConfig> {
        let mut state = self.state();
        let existing = state
            .clients
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;

        if let Some(port) = patch.port {
            if let Some(owner) = state.port_owner(port, Some(id)) {
                return Err(FleetError::PortInUse {
                    port,
                    owner: owner.id.clone(),
                });
            }
        }

        let mut updated = existing.clone();
        patch.apply_to(&mut updated);
        validate_client_config(&updated)?;
        updated.updated_at = Utc::now().max(existing.updated_at);

        let mut next = state.clone();
        next.clients.insert(id.to_string(), updated.clone());
        self.persist(&next)?;
        *state = next;

        info!(client = %id, "client updated");
        Ok(updated)
    }

    /// Remove a client. Stopping its worker is the caller's job.
    pub fn delete(&self, id: &str) -> Result<ClientConfig> {
        let mut state = self.state();
        if !state.clients.contains_key(id) {
            return Err(FleetError::NotFound(id.to_string()));
        }

        let mut next = state.clone();
        let removed = next
            .clients
            .remove(id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        next.order.retain(|existing| existing != id);
        self.persist(&next)?;
        *state = next;

        info!(client = %id, "client deleted");
        Ok(removed)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<ClientConfig> {
        self.update(id, &ClientPatch::active(active))
    }

    pub fn get(&self, id: &str) -> Option<ClientConfig> {
        self.state().clients.get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state().clients.contains_key(id)
    }

    /// All clients in insertion order.
    pub fn get_all(&self) -> Vec<ClientConfig> {
        self.state().ordered().cloned().collect()
    }

    /// Clients with `active = true`, in insertion order.
    pub fn get_active(&self) -> Vec<ClientConfig> {
        self.state().ordered().filter(|c| c.active).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `port` belongs to any client other than `exclude`.
    pub fn is_port_in_use(&self, port: u16, exclude: Option<&str>) -> bool {
        self.state().port_owner(port, exclude).is_some()
    }

    /// First port `>= floor` no client uses, or `None` if the range above
    /// `floor` is exhausted.
    pub fn next_available_port(&self, floor: u16) -> Option<u16> {
        let state = self.state();
        let used: std::collections::HashSet<u16> =
            state.clients.values().map(|c| c.port).collect();
        (floor..=u16::MAX).find(|p| !used.contains(p))
    }
}
