// tests/real_worker.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, TestResult};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};

use botfleet::errors::FleetError;
use botfleet::exec::RealLauncher;
use botfleet::fs::RealFileSystem;
use botfleet::registry::ClientRegistry;
use botfleet::supervisor::{RestartPolicy, Supervisor, SupervisorSettings, WorkerPaths};
use botfleet::types::BotStatus;
use botfleet_test_utils::{wait_for_status, with_timeout, NewClientBuilder};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write worker script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("make script executable");
    path
}

/// Announces itself, authenticates, then idles until SIGTERM.
const WELL_BEHAVED: &str = r#"
trap 'exit 0' TERM
echo "worker booting on port $BOT_PORT"
echo '{"type":"AUTHENTICATED","clientId":"someone-else"}'
echo '{"type":"READY","clientId":"'"$BOT_ID"'"}'
echo '{"type":"QR_GENERATED","clientId":"'"$BOT_ID"'","payload":"'"$BOT_QR_PATH"'"}'
while true; do sleep 0.05; done
"#;

/// Reports ready, then dies.
const CRASHING: &str = r#"
echo '{"type":"READY","clientId":"'"$BOT_ID"'"}'
echo "fatal: provider unreachable" >&2
exit 3
"#;

struct RealFleet {
    _dir: TempDir,
    supervisor: Supervisor,
    storage: PathBuf,
}

fn real_fleet(script: &str, max_attempts: u32) -> RealFleet {
    init_tracing();
    let dir = tempdir().expect("tempdir");
    let worker = write_script(dir.path(), "bot", script);
    let storage = dir.path().join("storage");

    let registry = Arc::new(
        ClientRegistry::load_all(dir.path().join("clients.json"), Arc::new(RealFileSystem))
            .expect("registry loads"),
    );
    registry
        .add(NewClientBuilder::new("900123", 4100).name("Acme").build())
        .expect("valid client");

    let settings = SupervisorSettings {
        storage_path: storage.clone(),
        worker_paths: WorkerPaths {
            standard: worker,
            business_api: dir.path().join("missing-business-worker"),
        },
        restart: RestartPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
        },
        stop_grace_period: Duration::from_secs(2),
        restart_pause: Duration::ZERO,
        manager_port: 4000,
    };
    let supervisor = Supervisor::new(
        registry,
        Arc::new(RealLauncher::new()),
        Arc::new(RealFileSystem),
        settings,
    );

    RealFleet {
        _dir: dir,
        supervisor,
        storage,
    }
}

#[tokio::test]
async fn real_worker_reports_status_over_stdout() -> TestResult {
    let fleet = real_fleet(WELL_BEHAVED, 3);
    let sup = &fleet.supervisor;

    let started = sup.start("900123").await?;
    assert!(started.process_id.is_some());
    assert!(fleet.storage.join("900123").join("sessions").is_dir());

    let status = wait_for_status(sup, "900123", BotStatus::Authenticating).await;
    assert_eq!(
        status.qr_asset_path,
        fleet.storage.join("900123").join("qr.png")
    );

    // The message addressed to another client was dropped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = sup.get_status("900123")?;
    assert_eq!(status.status, BotStatus::Authenticating);
    assert_eq!(status.authenticated_at, None);

    with_timeout(sup.stop("900123")).await?;
    assert_eq!(sup.get_status("900123")?.status, BotStatus::Offline);
    assert!(!sup.is_running("900123"));
    assert!(!sup.has_pending_restart("900123"));
    Ok(())
}

#[tokio::test]
async fn crashing_real_worker_is_restarted_then_parked() -> TestResult {
    let fleet = real_fleet(CRASHING, 1);
    let sup = &fleet.supervisor;

    sup.start("900123").await?;

    let parked = wait_for_status(sup, "900123", BotStatus::Error).await;
    let reason = parked.last_error.unwrap_or_default();
    assert!(reason.contains("maximum restart attempts"), "{reason}");
    assert!(reason.contains("code 3"), "{reason}");
    assert_eq!(sup.restart_attempts("900123"), 1);
    assert!(!sup.is_running("900123"));
    Ok(())
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() -> TestResult {
    let fleet = real_fleet(WELL_BEHAVED, 3);
    let sup = &fleet.supervisor;
    sup.registry().add(
        NewClientBuilder::new("biz", 4200).business_api().build(),
    )?;

    let err = sup.start("biz").await.unwrap_err();
    assert!(matches!(err, FleetError::Spawn { ref reason, .. } if reason.contains("not found")));
    assert_eq!(sup.get_status("biz")?.status, BotStatus::Error);
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_real_workers() -> TestResult {
    let fleet = real_fleet(WELL_BEHAVED, 3);
    let sup = &fleet.supervisor;

    sup.start("900123").await?;
    wait_for_status(sup, "900123", BotStatus::Authenticating).await;

    with_timeout(sup.shutdown()).await;
    assert!(!sup.is_running("900123"));
    assert_eq!(sup.get_status("900123")?.status, BotStatus::Offline);
    Ok(())
}
