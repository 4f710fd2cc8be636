pub mod builders;
pub mod fake_launcher;

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use botfleet::fs::mock::MockFileSystem;
use botfleet::registry::ClientRegistry;
use botfleet::supervisor::{BotInstance, Supervisor, SupervisorSettings};
use botfleet::types::BotStatus;

pub use builders::{fast_settings, NewClientBuilder};
pub use fake_launcher::{FakeLauncher, FakeWorker, LaunchRecord};

static INIT: Once = Once::new();

/// Install a test subscriber once per test binary. Output is captured per
/// test and shown for failures; `RUST_LOG=botfleet=debug` widens it.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `get_status` until `id` reports `status`.
pub async fn wait_for_status(supervisor: &Supervisor, id: &str, status: BotStatus) -> BotInstance {
    let mut last = None;
    for _ in 0..1000 {
        let current = supervisor.get_status(id).expect("client is registered");
        if current.status == status {
            return current;
        }
        last = Some(current.status);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("client {id} never reached {status}; last status {last:?}");
}

/// Supervisor wired to a [`FakeLauncher`] and an in-memory filesystem.
pub struct TestFleet {
    pub supervisor: Supervisor,
    pub launcher: FakeLauncher,
    pub fs: MockFileSystem,
    pub registry: Arc<ClientRegistry>,
    pub storage: PathBuf,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_settings(fast_settings(&PathBuf::from("/fleet/storage")))
    }

    pub fn with_settings(settings: SupervisorSettings) -> Self {
        let fs = MockFileSystem::new();
        let registry = Arc::new(
            ClientRegistry::load_all("/fleet/clients.json", Arc::new(fs.clone()))
                .expect("empty registry loads"),
        );
        let launcher = FakeLauncher::new();
        let storage = settings.storage_path.clone();
        let supervisor = Supervisor::new(
            registry.clone(),
            Arc::new(launcher.clone()),
            Arc::new(fs.clone()),
            settings,
        );

        Self {
            supervisor,
            launcher,
            fs,
            registry,
            storage,
        }
    }

    /// Register `id` on `port` with default settings.
    pub fn add(&self, id: &str, port: u16) {
        self.registry
            .add(NewClientBuilder::new(id, port).build())
            .expect("client is valid");
    }
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}
