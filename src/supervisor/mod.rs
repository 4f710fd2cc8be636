// src/supervisor/mod.rs

//! Process supervisor.
//!
//! The [`Supervisor`] owns one worker process per registered client and the
//! in-memory state describing it. It is structured like a small actor:
//!
//! - all instance/handle/counter maps live in a single [`state::FleetState`]
//!   behind a sync mutex that is never held across an `.await`;
//! - lifecycle calls (`start`, `stop`, `restart`, ...) against the same
//!   client id are serialized by a per-client async lock, while different ids
//!   proceed in parallel;
//! - worker messages and exits arrive as [`SupervisorEvent`]s on one channel
//!   and are applied in order by the event loop in [`events`];
//! - the status rules themselves are pure functions in [`transitions`].
//!
//! The supervisor must be created inside a Tokio runtime.

mod events;
pub mod health;
pub mod instance;
pub mod layout;
mod management;
mod state;
pub mod transitions;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{FleetError, Result};
use crate::exec::{MessageSink, WorkerExit, WorkerHandle, WorkerLauncher};
use crate::fs::FileSystem;
use crate::ipc::WorkerMessage;
use crate::registry::{ClientConfig, ClientRegistry};
use crate::types::BotStatus;

pub use health::HealthMonitor;
pub use instance::{BotInstance, FleetInfo};
pub use layout::{StorageLayout, WorkerPaths};
pub use transitions::RestartPolicy;

use self::layout::launch_spec;
use self::state::{FleetState, TrackedWorker};

/// Capacity of the worker → supervisor event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for a process to disappear after SIGKILL.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Events flowing from worker processes into the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A worker emitted a status message.
    Message {
        client_id: String,
        generation: u64,
        message: WorkerMessage,
    },
    /// A worker process exited.
    Exited {
        client_id: String,
        generation: u64,
        exit: WorkerExit,
    },
}

/// Tunables for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub storage_path: PathBuf,
    pub worker_paths: WorkerPaths,
    pub restart: RestartPolicy,
    /// How long `stop` waits after SIGTERM before killing.
    pub stop_grace_period: Duration,
    /// Pause between stop and start in `restart`.
    pub restart_pause: Duration,
    /// Reported in fleet info.
    pub manager_port: u16,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            worker_paths: WorkerPaths::default(),
            restart: RestartPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
            },
            stop_grace_period: Duration::from_secs(5),
            restart_pause: Duration::from_secs(2),
            manager_port: 4000,
        }
    }
}

/// Cheap to clone; all clones share the same fleet.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ClientRegistry>,
    launcher: Arc<dyn WorkerLauncher>,
    fs: Arc<dyn FileSystem>,
    settings: SupervisorSettings,
    layout: StorageLayout,
    state: Mutex<FleetState>,
    client_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    events_tx: mpsc::Sender<SupervisorEvent>,
    shutting_down: AtomicBool,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("storage", &self.inner.layout.root())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(
        registry: Arc<ClientRegistry>,
        launcher: Arc<dyn WorkerLauncher>,
        fs: Arc<dyn FileSystem>,
        settings: SupervisorSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let layout = StorageLayout::new(&settings.storage_path);

        let inner = Arc::new(Inner {
            registry,
            launcher,
            fs,
            settings,
            layout,
            state: Mutex::new(FleetState::default()),
            client_locks: Mutex::new(HashMap::new()),
            events_tx,
            shutting_down: AtomicBool::new(false),
            cancel: cancel.clone(),
            event_loop: Mutex::new(None),
            started: Instant::now(),
        });

        let handle = events::spawn_event_loop(Arc::downgrade(&inner), events_rx, cancel);
        *lock(&inner.event_loop) = Some(handle);

        Self { inner }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        lock(&self.inner.state)
    }

    /// Serialize lifecycle operations on one client id.
    async fn lock_client(&self, id: &str) -> OwnedMutexGuard<()> {
        let client_lock = lock(&self.inner.client_locks)
            .entry(id.to_string())
            .or_default()
            .clone();
        client_lock.lock_owned().await
    }

    fn not_found(id: &str) -> FleetError {
        FleetError::NotFound(id.to_string())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start the worker of `id`.
    ///
    /// Idempotent: if a live worker already reports an active status, the
    /// current instance is returned and nothing is spawned. Refused with
    /// `ShuttingDown` once `shutdown` has begun.
    pub async fn start(&self, id: &str) -> Result<BotInstance> {
        let _guard = self.lock_client(id).await;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: &str) -> Result<BotInstance> {
        if self.is_shutting_down() {
            return Err(FleetError::ShuttingDown);
        }
        let config = self.inner.registry.get(id).ok_or_else(|| Self::not_found(id))?;

        let existing = {
            let state = self.state();
            let alive = state.workers.get(id).is_some_and(|w| w.handle.is_alive());
            state
                .instances
                .get(id)
                .filter(|inst| alive && inst.status.is_active())
                .cloned()
        };
        if let Some(mut instance) = existing {
            debug!(client = %id, status = %instance.status, "worker already running");
            instance.refresh_from(&config);
            return Ok(instance);
        }

        // A dead process, or a live one parked in ERROR, is replaced.
        let tracked = self.state().workers.contains_key(id);
        if tracked {
            self.stop_locked(id).await?;
        }

        self.spawn_worker(&config).await
    }

    async fn spawn_worker(&self, config: &ClientConfig) -> Result<BotInstance> {
        let id = config.id.clone();
        let layout = &self.inner.layout;
        let now = Utc::now();

        let generation = {
            let mut state = self.state();
            let generation = state.next_generation();
            state.current_generation.insert(id.clone(), generation);
            state
                .instances
                .insert(id.clone(), BotInstance::starting(config, layout, now));
            generation
        };

        let launched = match self.inner.fs.create_dir_all(&layout.session_dir(&id)) {
            Ok(()) => {
                let spec = launch_spec(config, layout, &self.inner.settings.worker_paths);
                let sink = MessageSink::new(id.clone(), generation, self.inner.events_tx.clone());
                self.inner.launcher.launch(spec, sink).await
            }
            Err(e) => Err(FleetError::Other(e.context("preparing worker storage"))),
        };

        match launched {
            Ok(handle) => {
                let pid = handle.pid();
                let snapshot = {
                    let mut state = self.state();
                    state.workers.insert(
                        id.clone(),
                        TrackedWorker {
                            generation,
                            handle: handle.clone(),
                        },
                    );
                    let instance = state
                        .instances
                        .entry(id.clone())
                        .or_insert_with(|| BotInstance::starting(config, layout, now));
                    instance.process_id = pid;
                    instance.clone()
                };
                self.watch_exit(id.clone(), generation, handle);
                info!(client = %id, pid = ?pid, port = config.port, "worker started");
                Ok(snapshot)
            }
            Err(err) => {
                let reason = match err {
                    FleetError::Spawn { reason, .. } => reason,
                    other => other.to_string(),
                };
                {
                    let mut state = self.state();
                    state.current_generation.remove(&id);
                    if let Some(instance) = state.instances.get_mut(&id) {
                        instance.mark_offline();
                        instance.status = BotStatus::Error;
                        instance.last_error = Some(reason.clone());
                    }
                }
                error!(client = %id, error = %reason, "failed to start worker");
                Err(FleetError::Spawn { id, reason })
            }
        }
    }

    fn watch_exit(&self, client_id: String, generation: u64, handle: Arc<dyn WorkerHandle>) {
        let tx = self.inner.events_tx.clone();
        tokio::spawn(async move {
            let exit = handle.wait().await;
            let _ = tx
                .send(SupervisorEvent::Exited {
                    client_id,
                    generation,
                    exit,
                })
                .await;
        });
    }

    /// Stop the worker of `id` and wait until it is gone.
    ///
    /// Sends a graceful-stop request, then kills the process if it is still
    /// running after the grace period. Any pending automatic restart is
    /// cancelled. Returns immediately if no worker is running.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let _guard = self.lock_client(id).await;
        let known = {
            let mut state = self.state();
            if state.cancel_pending_restart(id) {
                debug!(client = %id, "cancelled pending restart");
            }
            state.workers.contains_key(id) || state.instances.contains_key(id)
        };
        if !known && !self.inner.registry.exists(id) {
            return Err(Self::not_found(id));
        }
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: &str) -> Result<()> {
        let tracked = self.state().untrack(id);

        let mut outcome = Ok(());
        if let Some(worker) = tracked {
            outcome = self.terminate_worker(id, worker.handle.as_ref()).await;
        }

        if let Some(instance) = self.state().instances.get_mut(id) {
            instance.mark_offline();
        }
        outcome
    }

    async fn terminate_worker(&self, id: &str, handle: &dyn WorkerHandle) -> Result<()> {
        if !handle.is_alive() {
            debug!(client = %id, "worker already exited");
            return Ok(());
        }

        info!(client = %id, pid = ?handle.pid(), "stopping worker");
        if let Err(e) = handle.terminate() {
            warn!(client = %id, error = %e, "failed to send graceful stop");
        }

        let grace = self.inner.settings.stop_grace_period;
        match timeout(grace, handle.wait()).await {
            Ok(exit) => {
                info!(client = %id, exit = %exit, "worker stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    client = %id,
                    grace_ms = grace.as_millis() as u64,
                    "worker ignored graceful stop; killing"
                );
                if let Err(e) = handle.kill() {
                    warn!(client = %id, error = %e, "failed to kill worker");
                }
                match timeout(KILL_CONFIRM_TIMEOUT, handle.wait()).await {
                    Ok(exit) => {
                        info!(client = %id, exit = %exit, "worker killed");
                        Ok(())
                    }
                    Err(_) => Err(FleetError::Other(anyhow::anyhow!(
                        "worker '{id}' is still running after kill"
                    ))),
                }
            }
        }
    }

    /// Stop, pause briefly, start again.
    pub async fn restart(&self, id: &str) -> Result<BotInstance> {
        if !self.inner.registry.exists(id) {
            return Err(Self::not_found(id));
        }
        let _guard = self.lock_client(id).await;
        self.state().cancel_pending_restart(id);
        self.stop_locked(id).await?;
        sleep(self.inner.settings.restart_pause).await;
        self.start_locked(id).await
    }

    /// Stop every tracked worker concurrently. Failures are logged, never
    /// propagated.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.state().workers.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "stopping all workers");

        let mut set = JoinSet::new();
        for id in ids {
            let supervisor = self.clone();
            set.spawn(async move {
                let result = supervisor.stop(&id).await;
                (id, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => warn!(client = %id, error = %e, "failed to stop worker"),
                Err(e) => warn!(error = %e, "stop task panicked"),
            }
        }
    }

    /// Stop everything and shut the event loop down. Automatic restarts are
    /// disabled from the first moment of the call.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.state().cancel_all_pending_restarts();
        info!(cancelled_restarts = cancelled, "supervisor shutting down");

        self.stop_all().await;

        self.inner.cancel.cancel();
        let handle = lock(&self.inner.event_loop).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "supervisor event loop ended abnormally");
            }
        }
        info!("supervisor stopped");
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    fn snapshot(&self, config: &ClientConfig) -> BotInstance {
        let state = self.state();
        match state.instances.get(&config.id) {
            Some(instance) => {
                let mut instance = instance.clone();
                instance.refresh_from(config);
                instance
            }
            None => BotInstance::offline(config, &self.inner.layout),
        }
    }

    /// Current view of one registered client. Never-started clients are
    /// reported `OFFLINE`.
    pub fn get_status(&self, id: &str) -> Result<BotInstance> {
        let config = self.inner.registry.get(id).ok_or_else(|| Self::not_found(id))?;
        Ok(self.snapshot(&config))
    }

    /// Current view of every registered client, in registry order.
    pub fn get_all_statuses(&self) -> Vec<BotInstance> {
        self.inner
            .registry
            .get_all()
            .iter()
            .map(|config| self.snapshot(config))
            .collect()
    }

    pub fn info(&self) -> FleetInfo {
        let statuses = self.get_all_statuses();
        FleetInfo::from_instances(
            &statuses,
            self.inner.started.elapsed().as_secs(),
            self.inner.settings.manager_port,
        )
    }

    /// Number of automatic restarts made since the last authentication.
    pub fn restart_attempts(&self, id: &str) -> u32 {
        self.state().attempts(id)
    }

    pub fn has_pending_restart(&self, id: &str) -> bool {
        self.state().pending_restarts.contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state()
            .workers
            .get(id)
            .is_some_and(|w| w.handle.is_alive())
    }

    // ---------------------------------------------------------------------
    // Session storage
    // ---------------------------------------------------------------------

    pub fn qr_path(&self, id: &str) -> PathBuf {
        self.inner.layout.qr_path(id)
    }

    pub fn session_path(&self, id: &str) -> PathBuf {
        self.inner.layout.session_dir(id)
    }

    pub fn has_qr(&self, id: &str) -> bool {
        self.inner.fs.exists(&self.qr_path(id))
    }

    /// Pairing artifact bytes, `None` if the worker has not written one.
    pub fn read_qr(&self, id: &str) -> Result<Option<Vec<u8>>> {
        if !self.inner.registry.exists(id) {
            return Err(Self::not_found(id));
        }
        let path = self.qr_path(id);
        if !self.inner.fs.exists(&path) {
            return Ok(None);
        }
        Ok(Some(self.inner.fs.read(&path)?))
    }

    /// Delete session data and the pairing artifact so the next start
    /// authenticates from scratch. Fails with `WorkerRunning` unless the
    /// worker is stopped.
    pub async fn clear_session(&self, id: &str) -> Result<()> {
        let _guard = self.lock_client(id).await;
        self.clear_session_locked(id)
    }

    fn clear_session_locked(&self, id: &str) -> Result<()> {
        if !self.inner.registry.exists(id) {
            return Err(Self::not_found(id));
        }
        let running = self.state().workers.contains_key(id);
        if running {
            return Err(FleetError::WorkerRunning(id.to_string()));
        }

        let session = self.session_path(id);
        remove_and_recreate(self.inner.fs.as_ref(), &session)?;
        self.inner.fs.remove_file(&self.qr_path(id))?;

        if let Some(instance) = self.state().instances.get_mut(id) {
            instance.authenticated_at = None;
            instance.last_error = None;
        }
        info!(client = %id, path = ?session, "session cleared");
        Ok(())
    }
}

fn remove_and_recreate(fs: &dyn FileSystem, dir: &Path) -> Result<()> {
    fs.remove_dir_all(dir)?;
    fs.create_dir_all(dir)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
