// src/registry/mod.rs

//! Durable tenant configuration.
//!
//! - [`model`] defines the persisted records and the add/update inputs.
//! - [`validate`] checks per-client invariants (id shape, port range,
//!   business-API credentials).
//! - [`store`] owns the in-memory map and the write-through file.

pub mod model;
pub mod store;
pub mod validate;

pub use model::{ClientConfig, ClientPatch, NewClient, ProviderCredentials, RegistryFile};
pub use store::{ClientRegistry, DEFAULT_PORT_FLOOR};
