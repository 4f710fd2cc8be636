// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a client's worker as seen by the supervisor.
///
/// - `Starting`: process spawned, worker has not reported READY yet.
/// - `Authenticating`: worker is up and waiting on the provider handshake
///   (e.g. a pairing code is displayed).
/// - `Online`: provider handshake succeeded.
/// - `Error`: worker reported a failure, spawning failed, or the restart
///   budget was exhausted.
/// - `Offline`: no process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Starting,
    Authenticating,
    Online,
    Error,
    Offline,
}

impl BotStatus {
    /// Statuses that claim a process should be running.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BotStatus::Starting | BotStatus::Authenticating | BotStatus::Online
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BotStatus::Starting => "STARTING",
            BotStatus::Authenticating => "AUTHENTICATING",
            BotStatus::Online => "ONLINE",
            BotStatus::Error => "ERROR",
            BotStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STARTING" => Ok(BotStatus::Starting),
            "AUTHENTICATING" => Ok(BotStatus::Authenticating),
            "ONLINE" => Ok(BotStatus::Online),
            "ERROR" => Ok(BotStatus::Error),
            "OFFLINE" => Ok(BotStatus::Offline),
            other => Err(format!("invalid bot status: {other}")),
        }
    }
}

/// Which messaging transport a client's worker speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    /// Interactive pairing (QR code) against the consumer protocol.
    Standard,
    /// Token based business API.
    BusinessApi,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Standard
    }
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Standard => "standard",
            ProviderKind::BusinessApi => "businessApi",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standard" => Ok(ProviderKind::Standard),
            "businessApi" | "business_api" => Ok(ProviderKind::BusinessApi),
            other => Err(format!(
                "invalid provider kind: {other} (expected \"standard\" or \"businessApi\")"
            )),
        }
    }
}
