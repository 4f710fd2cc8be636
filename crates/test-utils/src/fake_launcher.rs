use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use botfleet::errors::{FleetError, Result};
use botfleet::exec::{
    BoxFuture, ExitSignal, LaunchSpec, MessageSink, WorkerExit, WorkerHandle, WorkerLauncher,
    SIGKILL, SIGTERM,
};
use botfleet::ipc::WorkerMessage;

/// A worker that never touches the OS. The test decides what it says and
/// when it exits.
#[derive(Debug, Clone)]
pub struct FakeWorker {
    inner: Arc<FakeWorkerInner>,
}

#[derive(Debug)]
struct FakeWorkerInner {
    pid: u32,
    sink: MessageSink,
    exit: ExitSignal,
    ignore_terminate: AtomicBool,
    terminate_calls: AtomicUsize,
    killed: AtomicBool,
    vanished: AtomicBool,
}

impl FakeWorker {
    fn new(pid: u32, sink: MessageSink, ignore_terminate: bool) -> Self {
        Self {
            inner: Arc::new(FakeWorkerInner {
                pid,
                sink,
                exit: ExitSignal::new(),
                ignore_terminate: AtomicBool::new(ignore_terminate),
                terminate_calls: AtomicUsize::new(0),
                killed: AtomicBool::new(false),
                vanished: AtomicBool::new(false),
            }),
        }
    }

    pub fn pid_value(&self) -> u32 {
        self.inner.pid
    }

    pub fn client_id(&self) -> &str {
        self.inner.sink.client_id()
    }

    /// Send a status message as the worker would.
    pub async fn emit(&self, message: WorkerMessage) {
        self.inner.sink.send(message).await;
    }

    /// READY then AUTHENTICATED.
    pub async fn come_online(&self) {
        self.emit(WorkerMessage::Ready).await;
        self.emit(WorkerMessage::Authenticated).await;
    }

    /// Exit on its own with `code`.
    pub fn exit(&self, code: i32) {
        self.inner.exit.set(WorkerExit::code(code));
    }

    pub fn crash(&self) {
        self.exit(1);
    }

    /// Disappear without an exit ever being observed, like a process whose
    /// exit notification got lost. Only a liveness check notices.
    pub fn vanish(&self) {
        self.inner.vanished.store(true, Ordering::SeqCst);
    }

    /// Make SIGTERM a no-op, so `stop` has to fall back to a kill.
    pub fn set_ignore_terminate(&self, ignore: bool) {
        self.inner.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    pub fn terminate_calls(&self) -> usize {
        self.inner.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }
}

impl WorkerHandle for FakeWorker {
    fn pid(&self) -> Option<u32> {
        Some(self.inner.pid)
    }

    fn terminate(&self) -> anyhow::Result<()> {
        self.inner.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.ignore_terminate.load(Ordering::SeqCst) {
            self.inner.exit.set(WorkerExit::signaled(SIGTERM));
        }
        Ok(())
    }

    fn kill(&self) -> anyhow::Result<()> {
        self.inner.killed.store(true, Ordering::SeqCst);
        self.inner.exit.set(WorkerExit::signaled(SIGKILL));
        Ok(())
    }

    fn exit_status(&self) -> Option<WorkerExit> {
        self.inner.exit.get()
    }

    fn is_alive(&self) -> bool {
        !self.inner.vanished.load(Ordering::SeqCst) && self.inner.exit.get().is_none()
    }

    fn wait(&self) -> BoxFuture<'_, WorkerExit> {
        Box::pin(self.inner.exit.wait())
    }
}

/// One call to `launch`.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub spec: LaunchSpec,
    pub at: Instant,
    /// `None` when the launch was made to fail.
    pub worker: Option<FakeWorker>,
}

#[derive(Debug, Default)]
struct LauncherState {
    launches: Vec<LaunchRecord>,
    latest: HashMap<String, FakeWorker>,
    fail_next: Option<String>,
    ignore_terminate: bool,
    next_pid: u32,
}

/// `WorkerLauncher` that hands out [`FakeWorker`]s and records every launch.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launch fail as if the executable were missing.
    pub fn fail_next_launch(&self, reason: &str) {
        self.state.lock().unwrap().fail_next = Some(reason.to_string());
    }

    /// Workers launched from now on ignore SIGTERM.
    pub fn ignore_terminate_by_default(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_terminate = ignore;
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().unwrap().launches.len()
    }

    pub fn launch_count_for(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .launches
            .iter()
            .filter(|r| r.spec.client_id == id)
            .count()
    }

    /// Most recently launched worker for `id`.
    pub fn worker(&self, id: &str) -> Option<FakeWorker> {
        self.state.lock().unwrap().latest.get(id).cloned()
    }

    /// Poll until `id` has been launched `count` times, then return the
    /// latest worker.
    pub async fn wait_for_launch(&self, id: &str, count: usize) -> FakeWorker {
        let deadline = Instant::now() + Duration::from_secs(60);
        loop {
            if self.launch_count_for(id) >= count {
                if let Some(worker) = self.worker(id) {
                    return worker;
                }
            }
            assert!(
                Instant::now() < deadline,
                "client {id} was not launched {count} time(s)"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: LaunchSpec,
        sink: MessageSink,
    ) -> BoxFuture<'_, Result<Arc<dyn WorkerHandle>>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();

            if let Some(reason) = state.fail_next.take() {
                state.launches.push(LaunchRecord {
                    spec: spec.clone(),
                    at: Instant::now(),
                    worker: None,
                });
                return Err(FleetError::Spawn {
                    id: spec.client_id,
                    reason,
                });
            }

            state.next_pid += 1;
            let worker = FakeWorker::new(10_000 + state.next_pid, sink, state.ignore_terminate);
            state.latest.insert(spec.client_id.clone(), worker.clone());
            state.launches.push(LaunchRecord {
                spec,
                at: Instant::now(),
                worker: Some(worker.clone()),
            });

            Ok(Arc::new(worker) as Arc<dyn WorkerHandle>)
        })
    }
}
