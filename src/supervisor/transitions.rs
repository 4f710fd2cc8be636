// src/supervisor/transitions.rs

//! Pure status transitions.
//!
//! Everything in here is synchronous and free of IO so the lifecycle rules
//! can be unit tested without Tokio, channels or processes. The async shell
//! in [`super`] applies the returned decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::exec::WorkerExit;
use crate::ipc::WorkerMessage;
use crate::supervisor::instance::BotInstance;
use crate::types::BotStatus;

/// Side effects a worker message asks of the supervisor, beyond the instance
/// update itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageEffect {
    pub reset_restart_attempts: bool,
}

/// Apply one worker message to its instance.
pub fn apply_message(
    instance: &mut BotInstance,
    message: &WorkerMessage,
    now: DateTime<Utc>,
) -> MessageEffect {
    match message {
        WorkerMessage::Ready | WorkerMessage::Authenticating => {
            instance.status = BotStatus::Authenticating;
            MessageEffect::default()
        }
        WorkerMessage::QrGenerated { path } => {
            instance.status = BotStatus::Authenticating;
            instance.qr_asset_path.clone_from(path);
            MessageEffect::default()
        }
        WorkerMessage::Authenticated => {
            instance.status = BotStatus::Online;
            instance.authenticated_at = Some(now);
            instance.last_error = None;
            MessageEffect {
                reset_restart_attempts: true,
            }
        }
        WorkerMessage::StatusChange { status } => {
            instance.status = *status;
            MessageEffect::default()
        }
        WorkerMessage::Error { message } => {
            instance.status = BotStatus::Error;
            instance.last_error = Some(message.clone());
            MessageEffect::default()
        }
        WorkerMessage::MessageSent => MessageEffect::default(),
    }
}

/// Restart budget for unexpected exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (1-based): `base × attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// What to do after a tracked worker exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDecision {
    /// Graceful exit, or the supervisor is shutting down.
    Stay,
    /// Schedule restart number `attempt` after `delay`.
    Restart { attempt: u32, delay: Duration },
    /// Budget exhausted; park the instance in `ERROR`.
    GiveUp { reason: String },
}

/// Decide the follow-up to an exit. `attempts` is the number of automatic
/// restarts already made since the last successful authentication.
pub fn decide_exit(
    exit: &WorkerExit,
    attempts: u32,
    policy: &RestartPolicy,
    shutting_down: bool,
) -> ExitDecision {
    if shutting_down || exit.is_graceful() {
        return ExitDecision::Stay;
    }
    if attempts < policy.max_attempts {
        let attempt = attempts + 1;
        ExitDecision::Restart {
            attempt,
            delay: policy.delay_for(attempt),
        }
    } else {
        ExitDecision::GiveUp {
            reason: format!(
                "maximum restart attempts reached ({}); last {exit}",
                policy.max_attempts
            ),
        }
    }
}

/// Update an instance after its process exited.
pub fn apply_exit(instance: &mut BotInstance, decision: &ExitDecision) {
    instance.mark_offline();
    if let ExitDecision::GiveUp { reason } = decision {
        instance.status = BotStatus::Error;
        instance.last_error = Some(reason.clone());
    }
}

/// Liveness reconciliation used by the health sweep. Returns `true` if the
/// instance was corrected.
pub fn reconcile_liveness(instance: &mut BotInstance, process_alive: bool) -> bool {
    if process_alive || !instance.status.is_active() {
        return false;
    }
    instance.mark_offline();
    true
}
