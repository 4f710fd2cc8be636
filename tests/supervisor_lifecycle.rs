// tests/supervisor_lifecycle.rs

mod common;
use crate::common::{init_tracing, TestResult};

use std::path::PathBuf;

use botfleet::errors::FleetError;
use botfleet::fs::FileSystem;
use botfleet::ipc::WorkerMessage;
use botfleet::registry::ClientPatch;
use botfleet::types::BotStatus;
use botfleet_test_utils::{wait_for_status, with_timeout, NewClientBuilder, TestFleet};

#[tokio::test]
async fn worker_walks_from_offline_to_online_and_back() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet
        .registry
        .add(NewClientBuilder::new("900123", 4100).name("Acme").build())?;
    let sup = &fleet.supervisor;

    let before = sup.get_status("900123")?;
    assert_eq!(before.status, BotStatus::Offline);
    assert_eq!(before.process_id, None);

    let started = with_timeout(sup.start("900123")).await?;
    assert_eq!(started.status, BotStatus::Starting);
    assert_eq!(started.port, 4100);
    assert_eq!(started.display_name, "Acme");
    assert!(started.process_id.is_some());
    assert!(started.started_at.is_some());

    let worker = fleet.launcher.wait_for_launch("900123", 1).await;
    assert_eq!(started.process_id, Some(worker.pid_value()));

    worker.emit(WorkerMessage::Ready).await;
    wait_for_status(sup, "900123", BotStatus::Authenticating).await;

    worker.emit(WorkerMessage::Authenticated).await;
    let online = wait_for_status(sup, "900123", BotStatus::Online).await;
    assert!(online.authenticated_at.is_some());
    assert!(sup.is_running("900123"));

    with_timeout(sup.stop("900123")).await?;
    let stopped = sup.get_status("900123")?;
    assert_eq!(stopped.status, BotStatus::Offline);
    assert_eq!(stopped.process_id, None);
    assert_eq!(worker.terminate_calls(), 1);
    assert!(!worker.was_killed());
    assert!(!sup.is_running("900123"));
    Ok(())
}

#[tokio::test]
async fn start_is_idempotent_while_running() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    let first = sup.start("a").await?;
    let second = sup.start("a").await?;

    assert_eq!(fleet.launcher.launch_count_for("a"), 1);
    assert_eq!(first.process_id, second.process_id);
    Ok(())
}

#[tokio::test]
async fn unknown_clients_are_not_found() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    let sup = &fleet.supervisor;

    assert!(matches!(sup.start("ghost").await, Err(FleetError::NotFound(_))));
    assert!(matches!(sup.stop("ghost").await, Err(FleetError::NotFound(_))));
    assert!(matches!(sup.restart("ghost").await, Err(FleetError::NotFound(_))));
    assert!(matches!(sup.get_status("ghost"), Err(FleetError::NotFound(_))));
    assert!(matches!(sup.read_qr("ghost"), Err(FleetError::NotFound(_))));
    assert_eq!(fleet.launcher.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn stopping_a_stopped_client_is_a_no_op() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);

    fleet.supervisor.stop("a").await?;
    assert_eq!(fleet.supervisor.get_status("a")?.status, BotStatus::Offline);
    Ok(())
}

#[tokio::test]
async fn spawn_failure_parks_client_in_error_without_retry() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    fleet.launcher.fail_next_launch("no such file: ./workers/bot");

    let err = fleet.supervisor.start("a").await.unwrap_err();
    assert!(matches!(err, FleetError::Spawn { ref id, .. } if id == "a"));

    let status = fleet.supervisor.get_status("a")?;
    assert_eq!(status.status, BotStatus::Error);
    assert!(status.last_error.unwrap_or_default().contains("no such file"));

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(fleet.launcher.launch_count_for("a"), 1);
    assert!(!fleet.supervisor.has_pending_restart("a"));

    // A manual start afterwards works.
    let retried = fleet.supervisor.start("a").await?;
    assert_eq!(retried.status, BotStatus::Starting);
    assert_eq!(retried.last_error, None);
    Ok(())
}

#[tokio::test]
async fn stop_kills_a_worker_that_ignores_terminate() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    fleet.launcher.ignore_terminate_by_default(true);

    fleet.supervisor.start("a").await?;
    let worker = fleet.launcher.wait_for_launch("a", 1).await;

    with_timeout(fleet.supervisor.stop("a")).await?;

    assert_eq!(worker.terminate_calls(), 1);
    assert!(worker.was_killed());
    assert_eq!(fleet.supervisor.get_status("a")?.status, BotStatus::Offline);
    // Stopped on purpose: no automatic restart.
    assert!(!fleet.supervisor.has_pending_restart("a"));
    Ok(())
}

#[tokio::test]
async fn messages_from_a_replaced_worker_are_ignored() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let old = fleet.launcher.wait_for_launch("a", 1).await;

    sup.restart("a").await?;
    let new = fleet.launcher.wait_for_launch("a", 2).await;
    assert_ne!(old.pid_value(), new.pid_value());

    old.emit(WorkerMessage::Authenticated).await;
    new.emit(WorkerMessage::Ready).await;
    let current = wait_for_status(sup, "a", BotStatus::Authenticating).await;
    assert_eq!(current.process_id, Some(new.pid_value()));
    assert_eq!(current.authenticated_at, None);
    Ok(())
}

#[tokio::test]
async fn error_message_sets_error_but_keeps_process() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let worker = fleet.launcher.wait_for_launch("a", 1).await;
    worker
        .emit(WorkerMessage::Error {
            message: "provider rejected credentials".to_string(),
        })
        .await;

    let status = wait_for_status(sup, "a", BotStatus::Error).await;
    assert_eq!(
        status.last_error.as_deref(),
        Some("provider rejected credentials")
    );
    assert!(sup.is_running("a"));
    assert!(!sup.has_pending_restart("a"));
    assert_eq!(fleet.launcher.launch_count_for("a"), 1);

    // Starting a client parked in ERROR replaces its worker.
    sup.start("a").await?;
    assert_eq!(fleet.launcher.launch_count_for("a"), 2);
    assert_eq!(worker.terminate_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn qr_generated_points_at_pairing_artifact() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let worker = fleet.launcher.wait_for_launch("a", 1).await;

    let qr = sup.qr_path("a");
    assert_eq!(qr, PathBuf::from("/fleet/storage/a/qr.png"));
    assert!(sup.read_qr("a")?.is_none());

    fleet.fs.add_file(&qr, vec![0x89, b'P', b'N', b'G']);
    worker
        .emit(WorkerMessage::QrGenerated { path: qr.clone() })
        .await;

    let status = wait_for_status(sup, "a", BotStatus::Authenticating).await;
    assert_eq!(status.qr_asset_path, qr);
    assert!(sup.has_qr("a"));
    assert_eq!(sup.read_qr("a")?, Some(vec![0x89, b'P', b'N', b'G']));
    Ok(())
}

#[tokio::test]
async fn launch_spec_carries_client_environment() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.registry.add(
        NewClientBuilder::new("biz", 4200)
            .name("Biz Co")
            .webhook("https://hooks.example.com/biz")
            .business_api()
            .build(),
    )?;

    fleet.supervisor.start("biz").await?;
    let launches = fleet.launcher.launches();
    let spec = &launches[0].spec;

    assert_eq!(spec.client_id, "biz");
    assert_eq!(spec.program, PathBuf::from("./workers/bot-business"));
    let env = &spec.env;
    assert_eq!(env.get("BOT_ID").map(String::as_str), Some("biz"));
    assert_eq!(env.get("BOT_PORT").map(String::as_str), Some("4200"));
    assert_eq!(env.get("BOT_NAME").map(String::as_str), Some("Biz Co"));
    assert_eq!(
        env.get("BOT_WEBHOOK_URL").map(String::as_str),
        Some("https://hooks.example.com/biz")
    );
    assert_eq!(
        env.get("BOT_SESSION_PATH").map(String::as_str),
        Some("/fleet/storage/biz/sessions")
    );
    assert_eq!(
        env.get("BUSINESS_ACCOUNT_ID").map(String::as_str),
        Some("1098765432")
    );

    // The session directory exists before the worker runs.
    assert!(fleet.fs.exists(&fleet.supervisor.session_path("biz")));
    Ok(())
}

#[tokio::test]
async fn stop_all_stops_every_worker() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    for (id, port) in [("a", 4100), ("b", 4101), ("c", 4102)] {
        fleet.add(id, port);
        fleet.supervisor.start(id).await?;
    }
    fleet.launcher.worker("b").expect("b launched").set_ignore_terminate(true);

    with_timeout(fleet.supervisor.stop_all()).await;

    for id in ["a", "b", "c"] {
        assert!(!fleet.supervisor.is_running(id), "{id} still running");
        assert_eq!(fleet.supervisor.get_status(id)?.status, BotStatus::Offline);
    }
    assert!(fleet.launcher.worker("b").expect("b launched").was_killed());
    Ok(())
}

#[tokio::test]
async fn clear_session_requires_a_stopped_worker() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let session_file = sup.session_path("a").join("creds.json");
    fleet.fs.add_file(&session_file, "{}");
    fleet.fs.add_file(sup.qr_path("a"), vec![1, 2, 3]);

    assert!(matches!(
        sup.clear_session("a").await,
        Err(FleetError::WorkerRunning(_))
    ));
    assert!(fleet.fs.exists(&session_file));

    sup.stop("a").await?;
    sup.clear_session("a").await?;

    assert!(!fleet.fs.exists(&session_file));
    assert!(!sup.has_qr("a"));
    assert!(fleet.fs.exists(&sup.session_path("a")));
    assert_eq!(sup.get_status("a")?.authenticated_at, None);
    Ok(())
}

#[tokio::test]
async fn reset_session_wipes_and_restarts() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let first = fleet.launcher.wait_for_launch("a", 1).await;
    first.come_online().await;
    wait_for_status(sup, "a", BotStatus::Online).await;
    fleet.fs.add_file(sup.session_path("a").join("creds.json"), "{}");

    let fresh = with_timeout(sup.reset_session("a")).await?;
    assert_eq!(fresh.status, BotStatus::Starting);
    assert_eq!(fresh.authenticated_at, None);
    assert_eq!(fleet.launcher.launch_count_for("a"), 2);
    assert!(!fleet.fs.exists(&sup.session_path("a").join("creds.json")));
    Ok(())
}

#[tokio::test]
async fn reset_session_leaves_inactive_clients_stopped() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet
        .registry
        .add(NewClientBuilder::new("idle", 4100).inactive().build())?;

    let status = fleet.supervisor.reset_session("idle").await?;
    assert_eq!(status.status, BotStatus::Offline);
    assert_eq!(fleet.launcher.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn port_change_restarts_running_worker_on_new_port() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let old = fleet.launcher.wait_for_launch("a", 1).await;

    let updated = with_timeout(sup.update_client("a", &ClientPatch::port(4101))).await?;
    assert_eq!(updated.port, 4101);

    let new = fleet.launcher.wait_for_launch("a", 2).await;
    assert_ne!(old.pid_value(), new.pid_value());
    assert_eq!(old.terminate_calls(), 1);

    let launches = fleet.launcher.launches();
    assert_eq!(
        launches[1].spec.env.get("BOT_PORT").map(String::as_str),
        Some("4101")
    );
    assert_eq!(sup.get_status("a")?.port, 4101);
    Ok(())
}

#[tokio::test]
async fn rename_does_not_restart_and_deactivation_stops() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;
    sup.start("a").await?;

    let patch = ClientPatch {
        display_name: Some("Renamed".to_string()),
        ..ClientPatch::default()
    };
    sup.update_client("a", &patch).await?;
    assert_eq!(fleet.launcher.launch_count_for("a"), 1);
    assert_eq!(sup.get_status("a")?.display_name, "Renamed");

    sup.update_client("a", &ClientPatch::active(false)).await?;
    assert!(!sup.is_running("a"));
    assert_eq!(sup.get_status("a")?.status, BotStatus::Offline);
    assert_eq!(fleet.launcher.launch_count_for("a"), 1);
    Ok(())
}

#[tokio::test]
async fn update_of_a_stopped_client_does_not_start_it() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);

    fleet
        .supervisor
        .update_client("a", &ClientPatch::port(4200))
        .await?;
    assert_eq!(fleet.launcher.launch_count(), 0);
    assert_eq!(fleet.supervisor.get_status("a")?.port, 4200);
    Ok(())
}

#[tokio::test]
async fn create_client_auto_starts_active_clients_only() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    let sup = &fleet.supervisor;

    let (config, status) = sup
        .create_client(NewClientBuilder::new("a", 4100).build(), true)
        .await?;
    assert_eq!(config.id, "a");
    assert_eq!(status.status, BotStatus::Starting);

    let (_, status) = sup
        .create_client(NewClientBuilder::new("b", 4101).build(), false)
        .await?;
    assert_eq!(status.status, BotStatus::Offline);

    let (_, status) = sup
        .create_client(NewClientBuilder::new("c", 4102).inactive().build(), true)
        .await?;
    assert_eq!(status.status, BotStatus::Offline);

    assert_eq!(fleet.launcher.launch_count(), 1);

    let err = sup
        .create_client(NewClientBuilder::new("d", 4100).build(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::PortInUse { .. }));
    Ok(())
}

#[tokio::test]
async fn create_client_keeps_registration_when_start_fails() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.launcher.fail_next_launch("worker binary missing");

    let (_, status) = fleet
        .supervisor
        .create_client(NewClientBuilder::new("a", 4100).build(), true)
        .await?;
    assert_eq!(status.status, BotStatus::Error);
    assert!(fleet.registry.exists("a"));
    Ok(())
}

#[tokio::test]
async fn remove_client_stops_worker_and_forgets_it() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    let worker = fleet.launcher.wait_for_launch("a", 1).await;

    let removed = with_timeout(sup.remove_client("a")).await?;
    assert_eq!(removed.id, "a");
    assert_eq!(worker.terminate_calls(), 1);
    assert!(!fleet.registry.exists("a"));
    assert!(matches!(sup.get_status("a"), Err(FleetError::NotFound(_))));
    assert!(sup.get_all_statuses().is_empty());

    assert!(matches!(
        sup.remove_client("a").await,
        Err(FleetError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn fleet_info_counts_by_status() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    fleet.add("b", 4101);
    fleet.add("c", 4102);
    let sup = &fleet.supervisor;

    sup.start("a").await?;
    fleet.launcher.wait_for_launch("a", 1).await.come_online().await;
    wait_for_status(sup, "a", BotStatus::Online).await;
    sup.start("b").await?;

    let info = sup.info();
    assert_eq!(info.total_clients, 3);
    assert_eq!(info.online_clients, 1);
    assert_eq!(info.offline_clients, 2);
    assert_eq!(info.manager_port, 4000);
    assert_eq!(info.by_status.get(&BotStatus::Starting), Some(&1));
    assert_eq!(info.by_status.get(&BotStatus::Offline), Some(&1));

    let ids: Vec<String> = sup.get_all_statuses().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn boot_starts_active_clients_in_registry_order() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("first", 4100);
    fleet
        .registry
        .add(NewClientBuilder::new("idle", 4101).inactive().build())?;
    fleet.add("second", 4102);
    fleet.launcher.fail_next_launch("broken install");
    fleet.add("third", 4103);

    let cancel = tokio_util::sync::CancellationToken::new();
    let started = with_timeout(botfleet::start_active_clients(
        &fleet.supervisor,
        std::time::Duration::from_millis(10),
        &cancel,
    ))
    .await;

    // "first" hit the injected failure; the rest still started.
    assert_eq!(started, 2);
    let order: Vec<String> = fleet
        .launcher
        .launches()
        .into_iter()
        .map(|r| r.spec.client_id)
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
    assert_eq!(fleet.supervisor.get_status("first")?.status, BotStatus::Error);
    assert_eq!(fleet.supervisor.get_status("idle")?.status, BotStatus::Offline);
    Ok(())
}

#[tokio::test]
async fn cancelled_boot_starts_nothing_more() -> TestResult {
    init_tracing();
    let fleet = TestFleet::new();
    fleet.add("a", 4100);
    fleet.add("b", 4101);

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let started = botfleet::start_active_clients(
        &fleet.supervisor,
        std::time::Duration::from_millis(10),
        &cancel,
    )
    .await;

    assert_eq!(started, 0);
    assert_eq!(fleet.launcher.launch_count(), 0);
    Ok(())
}
