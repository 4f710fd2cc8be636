// src/supervisor/events.rs

//! Event loop applying worker messages and exits to fleet state.

use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::WorkerExit;
use crate::ipc::WorkerMessage;
use crate::supervisor::state::FleetState;
use crate::supervisor::transitions::{
    apply_exit, apply_message, decide_exit, reconcile_liveness, ExitDecision,
};
use crate::supervisor::{Inner, Supervisor, SupervisorEvent};

/// Spawn the loop that drains worker events until `cancel` fires or the
/// supervisor is dropped.
pub(super) fn spawn_event_loop(
    inner: Weak<Inner>,
    mut rx: mpsc::Receiver<SupervisorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("supervisor event loop started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(inner) = inner.upgrade() else { break };
                    Supervisor { inner }.handle_event(event);
                }
            }
        }
        debug!("supervisor event loop finished");
    })
}

impl Supervisor {
    pub(super) fn handle_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Message {
                client_id,
                generation,
                message,
            } => self.on_message(&client_id, generation, &message),
            SupervisorEvent::Exited {
                client_id,
                generation,
                exit,
            } => self.on_exit(&client_id, generation, exit),
        }
    }

    fn on_message(&self, id: &str, generation: u64, message: &WorkerMessage) {
        let transition = {
            let mut state = self.state();
            if !state.accepts_messages_from(id, generation) {
                debug!(client = %id, generation, kind = ?message.kind(), "message from replaced worker ignored");
                return;
            }
            let Some(instance) = state.instances.get_mut(id) else {
                return;
            };
            let previous = instance.status;
            let effect = apply_message(instance, message, Utc::now());
            let current = instance.status;
            if effect.reset_restart_attempts {
                state.restart_attempts.insert(id.to_string(), 0);
            }
            (previous, current)
        };

        let (previous, current) = transition;
        match message {
            WorkerMessage::Error { message } => {
                warn!(client = %id, error = %message, "worker reported an error");
            }
            WorkerMessage::QrGenerated { path } => {
                info!(client = %id, path = ?path, "pairing code generated");
            }
            WorkerMessage::MessageSent => {
                debug!(client = %id, "worker sent a message");
            }
            _ if previous != current => {
                info!(client = %id, from = %previous, to = %current, "status changed");
            }
            _ => {}
        }
    }

    fn on_exit(&self, id: &str, generation: u64, exit: WorkerExit) {
        let mut state = self.state();
        if !state.is_tracked(id, generation) {
            debug!(client = %id, generation, exit = %exit, "exit of untracked worker ignored");
            return;
        }
        state.untrack(id);

        let attempts = state.attempts(id);
        let decision = decide_exit(
            &exit,
            attempts,
            &self.inner.settings.restart,
            self.is_shutting_down(),
        );
        if let Some(instance) = state.instances.get_mut(id) {
            apply_exit(instance, &decision);
        }

        match decision {
            ExitDecision::Stay => {
                info!(client = %id, exit = %exit, "worker exited");
            }
            ExitDecision::Restart { attempt, delay } => {
                state.restart_attempts.insert(id.to_string(), attempt);
                warn!(
                    client = %id,
                    exit = %exit,
                    attempt,
                    max_attempts = self.inner.settings.restart.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "worker crashed; restart scheduled"
                );
                self.schedule_restart(&mut state, id, delay, attempt);
            }
            ExitDecision::GiveUp { reason } => {
                error!(client = %id, exit = %exit, reason = %reason, "worker crashed; giving up");
            }
        }
    }

    fn schedule_restart(&self, state: &mut FleetState, id: &str, delay: Duration, attempt: u32) {
        let weak = std::sync::Arc::downgrade(&self.inner);
        let client_id = id.to_string();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            Supervisor { inner }.run_scheduled_restart(&client_id, attempt).await;
        });

        if let Some(previous) = state
            .pending_restarts
            .insert(id.to_string(), task.abort_handle())
        {
            previous.abort();
        }
    }

    async fn run_scheduled_restart(&self, id: &str, attempt: u32) {
        let _guard = self.lock_client(id).await;

        // `stop` removes the entry before aborting; a missing entry means
        // this restart was cancelled while waiting for the lock.
        let still_pending = self.state().pending_restarts.remove(id).is_some();
        if !still_pending || self.is_shutting_down() {
            return;
        }
        match self.inner.registry.get(id) {
            Some(config) if config.active => {}
            Some(_) => {
                info!(client = %id, attempt, "client is inactive; restart skipped");
                return;
            }
            None => {
                debug!(client = %id, attempt, "client no longer registered; restart skipped");
                return;
            }
        }

        info!(client = %id, attempt, "restarting worker");
        if let Err(e) = self.start_locked(id).await {
            error!(client = %id, attempt, error = %e, "automatic restart failed");
        }
    }

    /// One health pass: any instance claiming an active status whose process
    /// is gone is corrected to `OFFLINE`. Never schedules restarts. Returns
    /// the corrected client ids.
    pub fn health_sweep(&self) -> Vec<String> {
        let corrected: Vec<String> = {
            let mut state = self.state();
            let FleetState {
                instances,
                workers,
                current_generation,
                ..
            } = &mut *state;

            instances
                .iter_mut()
                .filter_map(|(id, instance)| {
                    let alive = match workers.get(id) {
                        Some(worker) => worker.handle.is_alive(),
                        // Launch in flight: the handle is not recorded yet.
                        None => current_generation.contains_key(id),
                    };
                    reconcile_liveness(instance, alive).then(|| id.clone())
                })
                .collect()
        };

        for id in &corrected {
            warn!(client = %id, "worker process is gone; status corrected to OFFLINE");
        }
        corrected
    }
}
