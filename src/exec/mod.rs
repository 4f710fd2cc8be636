// src/exec/mod.rs

//! Worker process execution.
//!
//! - [`backend`] defines the launcher/handle traits the supervisor drives.
//! - [`process`] implements them on top of `tokio::process`.

pub mod backend;
pub mod process;

pub use backend::{
    BoxFuture, ExitSignal, LaunchSpec, MessageSink, WorkerExit, WorkerHandle, WorkerLauncher,
    SIGKILL, SIGTERM,
};
pub use process::{ProcessHandle, RealLauncher};
