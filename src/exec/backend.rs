// src/exec/backend.rs

//! Pluggable worker process abstraction.
//!
//! The supervisor never touches OS processes directly. It asks a
//! [`WorkerLauncher`] to spawn a worker and gets back a [`WorkerHandle`]
//! exposing the handful of operations it needs: graceful stop, forced kill,
//! wait for exit, exit code/signal and liveness.
//!
//! - `RealLauncher` (in [`super::process`]) spawns tokio child processes.
//! - Tests provide a fake launcher that never spawns anything and lets the
//!   test drive messages and exits by hand.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::errors::Result;
use crate::ipc::WorkerMessage;
use crate::supervisor::SupervisorEvent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// POSIX signal numbers the supervisor reasons about.
pub const SIGKILL: i32 = 9;
pub const SIGTERM: i32 = 15;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Exit status could not be determined.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Clean exit (code 0) or terminated by a graceful-stop signal. Such
    /// exits are never restarted.
    pub fn is_graceful(&self) -> bool {
        self.code == Some(0) || self.signal == Some(SIGTERM)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Everything needed to spawn one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub client_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables added on top of the supervisor's own environment.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

/// Write side of the status channel for one spawned worker.
///
/// Tagged with the spawn generation so the supervisor can drop messages
/// from a process it has already replaced.
#[derive(Debug, Clone)]
pub struct MessageSink {
    client_id: String,
    generation: u64,
    tx: mpsc::Sender<SupervisorEvent>,
}

impl MessageSink {
    pub fn new(client_id: impl Into<String>, generation: u64, tx: mpsc::Sender<SupervisorEvent>) -> Self {
        Self {
            client_id: client_id.into(),
            generation,
            tx,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward a message to the supervisor. Returns `false` once the
    /// supervisor has gone away.
    pub async fn send(&self, message: WorkerMessage) -> bool {
        self.tx
            .send(SupervisorEvent::Message {
                client_id: self.client_id.clone(),
                generation: self.generation,
                message,
            })
            .await
            .is_ok()
    }
}

/// Narrow interface over one running worker process.
pub trait WorkerHandle: Send + Sync + fmt::Debug {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to shut down gracefully (SIGTERM on unix).
    fn terminate(&self) -> anyhow::Result<()>;

    /// Kill the process without giving it a chance to clean up.
    fn kill(&self) -> anyhow::Result<()>;

    /// Exit code/signal, or `None` while the process is still running.
    fn exit_status(&self) -> Option<WorkerExit>;

    fn is_alive(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Resolves once the process has exited.
    fn wait(&self) -> BoxFuture<'_, WorkerExit>;
}

/// Spawns worker processes.
pub trait WorkerLauncher: Send + Sync {
    /// Spawn the worker described by `spec`. Status messages the worker emits
    /// must be forwarded through `sink`, in order, and all of them must be
    /// delivered before the returned handle reports the exit.
    fn launch(
        &self,
        spec: LaunchSpec,
        sink: MessageSink,
    ) -> BoxFuture<'_, Result<Arc<dyn WorkerHandle>>>;
}

/// One-shot exit slot shared between a process watcher and the handle.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<Option<WorkerExit>>>,
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the exit. Only the first call has an effect.
    pub fn set(&self, exit: WorkerExit) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(exit);
                true
            } else {
                false
            }
        })
    }

    pub fn get(&self) -> Option<WorkerExit> {
        *self.tx.borrow()
    }

    pub async fn wait(&self) -> WorkerExit {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or_else(WorkerExit::unknown),
            Err(_) => WorkerExit::unknown(),
        }
    }
}
