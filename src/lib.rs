// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod http;
pub mod ipc;
pub mod logging;
pub mod registry;
pub mod supervisor;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_config, ManagerConfig};
use crate::exec::RealLauncher;
use crate::fs::{FileSystem, RealFileSystem};
use crate::registry::ClientRegistry;
use crate::supervisor::{HealthMonitor, Supervisor};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - client registry
/// - supervisor + health monitor
/// - management HTTP API
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args.config)?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let registry = Arc::new(ClientRegistry::load_all(&config.clients_path, fs.clone())?);

    if args.dry_run {
        print_dry_run(&config, &registry);
        return Ok(());
    }

    fs.create_dir_all(&config.storage_path)?;

    let supervisor = Supervisor::new(
        registry.clone(),
        Arc::new(RealLauncher::new()),
        fs,
        config.supervisor_settings(),
    );

    let cancel = CancellationToken::new();
    let server =
        http::spawn_http_server(config.port, supervisor.clone(), cancel.child_token()).await?;

    let boot = if config.auto_start && !args.no_auto_start {
        let supervisor = supervisor.clone();
        let token = cancel.child_token();
        let stagger = config.startup_stagger;
        Some(tokio::spawn(async move {
            start_active_clients(&supervisor, stagger, &token).await
        }))
    } else {
        info!("auto-start disabled; waiting for management requests");
        None
    };

    let monitor = HealthMonitor::spawn(supervisor.clone(), config.health_check_interval);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
    info!("shutdown requested");

    cancel.cancel();
    if let Some(boot) = boot {
        if let Ok(started) = boot.await {
            debug!(started, "boot sequence finished");
        }
    }
    if let Err(e) = server.await {
        warn!(error = %e, "management API task ended abnormally");
    }

    monitor.stop().await;
    supervisor.shutdown().await;

    info!("botfleet stopped");
    Ok(())
}

/// Start every active client in registry order, pausing `stagger` between
/// consecutive starts. Individual failures are logged and skipped. Returns
/// the number of workers started.
pub async fn start_active_clients(
    supervisor: &Supervisor,
    stagger: Duration,
    cancel: &CancellationToken,
) -> usize {
    let active = supervisor.registry().get_active();
    info!(count = active.len(), "starting active clients");

    let mut started = 0;
    for (i, client) in active.iter().enumerate() {
        if i > 0 && !stagger.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(stagger) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        match supervisor.start(&client.id).await {
            Ok(_) => started += 1,
            Err(e) => error!(client = %client.id, error = %e, "failed to start client at boot"),
        }
    }

    info!(started, total = active.len(), "boot sequence complete");
    started
}

/// Simple dry-run output: print the effective config and the registered
/// clients.
fn print_dry_run(config: &ManagerConfig, registry: &ClientRegistry) {
    println!("botfleet dry-run");
    println!("  manager.port = {}", config.port);
    println!("  manager.storage_path = {}", config.storage_path.display());
    println!("  manager.clients_path = {}", config.clients_path.display());
    println!("  manager.auto_start = {}", config.auto_start);
    println!(
        "  supervisor.health_check_interval = {:?}",
        config.health_check_interval
    );
    println!(
        "  supervisor.max_restart_attempts = {}",
        config.max_restart_attempts
    );
    println!(
        "  supervisor.restart_base_delay = {:?}",
        config.restart_base_delay
    );
    println!();

    let clients = registry.get_all();
    println!("clients ({}):", clients.len());
    for client in clients {
        println!("  - {} ({})", client.id, client.display_name);
        println!("      port: {}", client.port);
        println!("      provider: {}", client.provider_kind);
        println!("      active: {}", client.active);
        if let Some(ref url) = client.webhook_base_url {
            println!("      webhook: {url}");
        }
    }

    debug!("dry-run complete (nothing started)");
}
