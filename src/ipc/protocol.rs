// src/ipc/protocol.rs

//! Worker → supervisor status messages.
//!
//! A worker writes one JSON object per line on its stdout:
//!
//! ```json
//! {"type":"QR_GENERATED","clientId":"900123","payload":"/srv/storage/900123/qr.png","timestamp":"2026-01-01T10:00:00Z"}
//! ```
//!
//! The envelope is decoded in two steps: serde picks the closed
//! [`MessageType`], then [`WorkerEnvelope::into_message`] interprets the
//! payload for that type. Adding a type means adding a variant to both enums
//! and the compiler points at every match that needs updating.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::BotStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ready,
    Authenticating,
    Authenticated,
    QrGenerated,
    StatusChange,
    Error,
    MessageSent,
}

/// Raw wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decoded, typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Worker booted and bound its HTTP listener.
    Ready,
    /// Provider handshake in progress.
    Authenticating,
    /// Provider handshake succeeded.
    Authenticated,
    /// A pairing artifact was written at `path`.
    QrGenerated { path: PathBuf },
    /// Explicit status override.
    StatusChange { status: BotStatus },
    /// Handled or unhandled failure inside the worker.
    Error { message: String },
    /// A message was delivered. Informational only.
    MessageSent,
}

impl WorkerMessage {
    pub fn kind(&self) -> MessageType {
        match self {
            WorkerMessage::Ready => MessageType::Ready,
            WorkerMessage::Authenticating => MessageType::Authenticating,
            WorkerMessage::Authenticated => MessageType::Authenticated,
            WorkerMessage::QrGenerated { .. } => MessageType::QrGenerated,
            WorkerMessage::StatusChange { .. } => MessageType::StatusChange,
            WorkerMessage::Error { .. } => MessageType::Error,
            WorkerMessage::MessageSent => MessageType::MessageSent,
        }
    }

    /// Build the wire envelope for this message (used by workers and tests).
    pub fn to_envelope(&self, client_id: &str) -> WorkerEnvelope {
        let payload = match self {
            WorkerMessage::QrGenerated { path } => {
                Some(Value::String(path.to_string_lossy().into_owned()))
            }
            WorkerMessage::StatusChange { status } => {
                Some(serde_json::json!({ "status": status }))
            }
            WorkerMessage::Error { message } => Some(serde_json::json!({ "message": message })),
            WorkerMessage::Ready
            | WorkerMessage::Authenticating
            | WorkerMessage::Authenticated
            | WorkerMessage::MessageSent => None,
        };

        WorkerEnvelope {
            kind: self.kind(),
            client_id: client_id.to_string(),
            payload,
            timestamp: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{kind:?} message is missing its payload")]
    MissingPayload { kind: MessageType },

    #[error("{kind:?} message has an invalid payload: {reason}")]
    InvalidPayload { kind: MessageType, reason: String },
}

impl WorkerEnvelope {
    pub fn into_message(self) -> Result<WorkerMessage, ProtocolError> {
        let kind = self.kind;
        match kind {
            MessageType::Ready => Ok(WorkerMessage::Ready),
            MessageType::Authenticating => Ok(WorkerMessage::Authenticating),
            MessageType::Authenticated => Ok(WorkerMessage::Authenticated),
            MessageType::MessageSent => Ok(WorkerMessage::MessageSent),
            MessageType::QrGenerated => {
                let payload = self.payload.ok_or(ProtocolError::MissingPayload { kind })?;
                let path = string_or_field(&payload, "path").ok_or_else(|| {
                    ProtocolError::InvalidPayload {
                        kind,
                        reason: "expected a path string or {\"path\": ...}".to_string(),
                    }
                })?;
                Ok(WorkerMessage::QrGenerated {
                    path: PathBuf::from(path),
                })
            }
            MessageType::StatusChange => {
                let payload = self.payload.ok_or(ProtocolError::MissingPayload { kind })?;
                let raw = payload
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProtocolError::InvalidPayload {
                        kind,
                        reason: "expected {\"status\": ...}".to_string(),
                    })?;
                let status = raw
                    .parse::<BotStatus>()
                    .map_err(|reason| ProtocolError::InvalidPayload { kind, reason })?;
                Ok(WorkerMessage::StatusChange { status })
            }
            MessageType::Error => {
                let message = self
                    .payload
                    .as_ref()
                    .and_then(|p| string_or_field(p, "message"))
                    .unwrap_or_else(|| "worker reported an error".to_string());
                Ok(WorkerMessage::Error { message })
            }
        }
    }
}

fn string_or_field(value: &Value, field: &str) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(field).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Result of interpreting one stdout line of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A well-formed protocol message.
    Message {
        client_id: String,
        message: WorkerMessage,
    },
    /// A protocol envelope whose payload could not be interpreted.
    Malformed(ProtocolError),
    /// Anything else: ordinary worker log output.
    Output(String),
}

/// Classify a line the worker wrote to stdout.
pub fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Line::Output(line.to_string());
    }

    match serde_json::from_str::<WorkerEnvelope>(trimmed) {
        Ok(envelope) => {
            let client_id = envelope.client_id.clone();
            match envelope.into_message() {
                Ok(message) => Line::Message { client_id, message },
                Err(e) => Line::Malformed(e),
            }
        }
        Err(_) => Line::Output(line.to_string()),
    }
}

/// Serialize a message as a single protocol line (no trailing newline).
pub fn encode_line(client_id: &str, message: &WorkerMessage) -> serde_json::Result<String> {
    serde_json::to_string(&message.to_envelope(client_id))
}
