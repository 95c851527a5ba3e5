//! Child process supervision.
//!
//! One registry of live children keyed by a caller-chosen id. Each spawned
//! process gets a monitor task that streams stdout/stderr lines and reports
//! exit exactly once; stopping escalates SIGTERM → SIGKILL after a grace
//! period. Callers consume the event receiver; the supervisor never touches
//! the database.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a process with id '{0}' is already running")]
    AlreadyRunning(String),
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One line or exit notification from a supervised child.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Line(String),
    ErrLine(String),
    Exited { code: Option<i32> },
}

struct ProcHandle {
    pid: u32,
}

/// Spawn parameters for a supervised child.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct Supervisor {
    procs: Arc<Mutex<HashMap<String, ProcHandle>>>,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(stop_grace: Duration) -> Self {
        Self {
            procs: Arc::new(Mutex::new(HashMap::new())),
            stop_grace,
        }
    }

    /// Spawn a child under `id`. Fails fast if `id` already has a live
    /// process. Returns the OS pid and the event stream; the stream ends
    /// with exactly one `Exited`.
    pub async fn start(
        &self,
        id: &str,
        spec: SpawnSpec,
    ) -> Result<(u32, mpsc::UnboundedReceiver<ProcessEvent>), SupervisorError> {
        let mut procs = self.procs.lock().await;
        if procs.contains_key(id) {
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let pid = child.id().unwrap_or(0);
        procs.insert(id.to_string(), ProcHandle { pid });
        drop(procs);

        tracing::info!(id, pid, program = %spec.program, "process started");

        let (tx, rx) = mpsc::unbounded_channel();
        let procs = Arc::clone(&self.procs);
        let id = id.to_string();
        tokio::spawn(async move {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let out_tx = tx.clone();
            let out_task = tokio::spawn(async move {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if out_tx.send(ProcessEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                }
            });
            let err_tx = tx.clone();
            let err_task = tokio::spawn(async move {
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if err_tx.send(ProcessEvent::ErrLine(line)).is_err() {
                            break;
                        }
                    }
                }
            });

            let _ = out_task.await;
            let _ = err_task.await;
            let status = child.wait().await;
            let code = status.ok().and_then(|s| s.code());

            procs.lock().await.remove(&id);
            tracing::info!(id = %id, ?code, "process exited");
            let _ = tx.send(ProcessEvent::Exited { code });
        });

        Ok((pid, rx))
    }

    /// Request a stop. Returns false if nothing is running under `id`.
    /// Sends SIGTERM, then SIGKILL after the grace period if the process is
    /// still registered.
    pub async fn stop(&self, id: &str) -> bool {
        let pid = match self.procs.lock().await.get(id) {
            Some(handle) => handle.pid,
            None => return false,
        };

        tracing::info!(id, pid, "stopping process");
        signal(pid, Signal::Term);

        let procs = Arc::clone(&self.procs);
        let grace = self.stop_grace;
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_running = procs.lock().await.get(&id).map(|h| h.pid) == Some(pid);
            if still_running {
                tracing::warn!(id = %id, pid, "grace period elapsed, killing");
                signal(pid, Signal::Kill);
            }
        });
        true
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.procs.lock().await.contains_key(id)
    }

    pub async fn running_pid(&self, id: &str) -> Option<u32> {
        self.procs.lock().await.get(id).map(|h| h.pid)
    }

    /// Stop everything still registered. Used during server shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.procs.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

/// Whether a pid refers to a live process, without reaping it.
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

enum Signal {
    Term,
    Kill,
}

fn signal(pid: u32, sig: Signal) {
    #[cfg(unix)]
    {
        let signum = match sig {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        unsafe {
            libc::kill(pid as i32, signum);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, sig);
    }
}
