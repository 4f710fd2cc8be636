// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Client not found: {0}")]
    NotFound(String),

    #[error("Client with id {0} already exists")]
    DuplicateId(String),

    #[error("Port {port} is already used by client {owner}")]
    PortInUse { port: u16, owner: String },

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker for client {0} is running; stop it first")]
    WorkerRunning(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("Failed to spawn worker for client {id}: {reason}")]
    Spawn { id: String, reason: String },

    #[error("Client registry at {path:?} is corrupt: {reason}")]
    CorruptRegistry { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;
