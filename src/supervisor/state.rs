// src/supervisor/state.rs

//! In-memory fleet state owned by the supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::AbortHandle;

use crate::exec::WorkerHandle;
use crate::supervisor::instance::BotInstance;

/// A spawned worker the supervisor is responsible for.
#[derive(Debug, Clone)]
pub(crate) struct TrackedWorker {
    pub generation: u64,
    pub handle: Arc<dyn WorkerHandle>,
}

/// All mutable supervisor state, behind one lock. The lock is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct FleetState {
    pub instances: HashMap<String, BotInstance>,
    pub workers: HashMap<String, TrackedWorker>,
    /// Generation whose messages are currently accepted, per client.
    pub current_generation: HashMap<String, u64>,
    pub restart_attempts: HashMap<String, u32>,
    pub pending_restarts: HashMap<String, AbortHandle>,
    next_generation: u64,
}

impl FleetState {
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn accepts_messages_from(&self, id: &str, generation: u64) -> bool {
        self.current_generation.get(id) == Some(&generation)
    }

    pub fn is_tracked(&self, id: &str, generation: u64) -> bool {
        self.workers
            .get(id)
            .is_some_and(|w| w.generation == generation)
    }

    /// Forget the running worker of `id`, returning it.
    pub fn untrack(&mut self, id: &str) -> Option<TrackedWorker> {
        self.current_generation.remove(id);
        self.workers.remove(id)
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.restart_attempts.get(id).copied().unwrap_or(0)
    }

    pub fn cancel_pending_restart(&mut self, id: &str) -> bool {
        match self.pending_restarts.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_pending_restarts(&mut self) -> usize {
        let count = self.pending_restarts.len();
        for (_, handle) in self.pending_restarts.drain() {
            handle.abort();
        }
        count
    }

    pub fn forget(&mut self, id: &str) {
        self.instances.remove(id);
        self.restart_attempts.remove(id);
        self.cancel_pending_restart(id);
        self.untrack(id);
    }
}
