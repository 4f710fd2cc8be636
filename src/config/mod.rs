// src/config/mod.rs

//! Configuration loading and validation for botfleet.
//!
//! - TOML-backed data model (`model.rs`).
//! - File loading and environment overrides (`loader.rs`).
//! - Validation into [`ManagerConfig`] (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{apply_env_overrides, load_config, load_config_with_env, load_from_path};
pub use model::{ManagerConfig, RawConfigFile, RawDuration};
