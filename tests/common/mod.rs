#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use botfleet::fs::RealFileSystem;
use botfleet::registry::ClientRegistry;

pub use botfleet_test_utils::init_tracing;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Registry file path inside `dir`.
pub fn registry_path(dir: &Path) -> PathBuf {
    dir.join("config").join("clients.json")
}

/// Load (or create) the registry under `dir` on the real filesystem.
pub fn open_registry(dir: &Path) -> botfleet::errors::Result<ClientRegistry> {
    ClientRegistry::load_all(registry_path(dir), Arc::new(RealFileSystem))
}
