// src/exec/process.rs

//! Real worker processes via `tokio::process`.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};
use crate::exec::backend::{
    BoxFuture, ExitSignal, LaunchSpec, MessageSink, WorkerExit, WorkerHandle, WorkerLauncher,
};
use crate::ipc::{parse_line, Line};

/// How long the exit watcher waits for stdout to drain after the process
/// has exited. A grandchild holding the pipe open must not block the exit
/// notification forever.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Launcher that spawns OS processes.
#[derive(Debug, Clone, Default)]
pub struct RealLauncher;

impl RealLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerLauncher for RealLauncher {
    fn launch(
        &self,
        spec: LaunchSpec,
        sink: MessageSink,
    ) -> BoxFuture<'_, Result<Arc<dyn WorkerHandle>>> {
        Box::pin(async move {
            let handle = spawn_worker(spec, sink)?;
            Ok(handle as Arc<dyn WorkerHandle>)
        })
    }
}

fn spawn_worker(spec: LaunchSpec, sink: MessageSink) -> Result<Arc<ProcessHandle>> {
    if !spec.program.exists() {
        return Err(FleetError::Spawn {
            id: spec.client_id,
            reason: format!("worker executable not found: {}", spec.program.display()),
        });
    }

    info!(
        client = %spec.client_id,
        program = %spec.program.display(),
        "spawning worker process"
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| FleetError::Spawn {
        id: spec.client_id.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id();
    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| spawn_stdout_monitor(stdout, sink));
    if let Some(stderr) = child.stderr.take() {
        spawn_stderr_logger(stderr, spec.client_id.clone());
    }

    let handle = Arc::new(ProcessHandle {
        client_id: spec.client_id.clone(),
        pid,
        exit: ExitSignal::new(),
        kill_requested: Arc::new(Notify::new()),
    });

    tokio::spawn(watch_child(
        child,
        stdout_task,
        spec.client_id,
        handle.exit.clone(),
        handle.kill_requested.clone(),
    ));

    Ok(handle)
}

/// Owns the child until it exits, then publishes the exit status once all
/// stdout messages have been forwarded.
async fn watch_child(
    mut child: Child,
    stdout_task: Option<JoinHandle<()>>,
    client_id: String,
    exit: ExitSignal,
    kill_requested: Arc<Notify>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_requested.notified() => {
            if let Err(e) = child.start_kill() {
                warn!(client = %client_id, error = %e, "failed to kill worker process");
            }
            child.wait().await
        }
    };

    let result = match status {
        Ok(status) => exit_from_status(status),
        Err(e) => {
            warn!(client = %client_id, error = %e, "failed to wait for worker process");
            WorkerExit::unknown()
        }
    };

    if let Some(task) = stdout_task {
        if timeout(STDOUT_DRAIN_TIMEOUT, task).await.is_err() {
            debug!(client = %client_id, "worker stdout still open after exit; not waiting");
        }
    }

    debug!(client = %client_id, exit = %result, "worker process exited");
    exit.set(result);
}

#[cfg(unix)]
fn exit_from_status(status: ExitStatus) -> WorkerExit {
    use std::os::unix::process::ExitStatusExt;
    WorkerExit {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_from_status(status: ExitStatus) -> WorkerExit {
    WorkerExit {
        code: status.code(),
        signal: None,
    }
}

/// Read the worker's stdout line by line. Protocol lines become supervisor
/// events, everything else is logged as worker output.
fn spawn_stdout_monitor(stdout: ChildStdout, sink: MessageSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            match parse_line(&line) {
                Line::Message { client_id, message } => {
                    if client_id != sink.client_id() {
                        warn!(
                            client = %sink.client_id(),
                            claimed = %client_id,
                            "worker message carries a foreign clientId; dropped"
                        );
                        continue;
                    }
                    debug!(client = %client_id, kind = ?message.kind(), "worker message");
                    if !sink.send(message).await {
                        debug!(client = %client_id, "supervisor gone; draining stdout");
                    }
                }
                Line::Malformed(err) => {
                    warn!(client = %sink.client_id(), error = %err, "malformed worker message");
                }
                Line::Output(text) => {
                    info!(target: "botfleet::worker", client = %sink.client_id(), "{}", text);
                }
            }
        }
    })
}

fn spawn_stderr_logger(stderr: ChildStderr, client_id: String) {
    tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(target: "botfleet::worker", client = %client_id, "{}", line);
        }
    });
}

/// Handle to a spawned worker process.
#[derive(Debug)]
pub struct ProcessHandle {
    client_id: String,
    pid: Option<u32>,
    exit: ExitSignal,
    kill_requested: Arc<Notify>,
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self) -> anyhow::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.send_terminate()
    }

    fn kill(&self) -> anyhow::Result<()> {
        if self.is_alive() {
            debug!(client = %self.client_id, pid = ?self.pid, "killing worker process");
            self.kill_requested.notify_one();
        }
        Ok(())
    }

    fn exit_status(&self) -> Option<WorkerExit> {
        self.exit.get()
    }

    fn wait(&self) -> BoxFuture<'_, WorkerExit> {
        Box::pin(self.exit.wait())
    }
}

impl ProcessHandle {
    #[cfg(unix)]
    fn send_terminate(&self) -> anyhow::Result<()> {
        use anyhow::Context;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).context("worker pid out of range")?;
        debug!(client = %self.client_id, pid, "sending SIGTERM to worker");
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("sending SIGTERM to pid {pid}")),
        }
    }

    /// No graceful-stop signal off unix; fall back to a hard kill.
    #[cfg(not(unix))]
    fn send_terminate(&self) -> anyhow::Result<()> {
        self.kill()
    }
}
