//! Long-running auxiliary services (dev servers, watchers) defined in a
//! static TOML file and run under the shared supervisor.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::{DashboardEvent, EventBus};
use crate::supervisor::{ProcessEvent, SpawnSpec, Supervisor, SupervisorError};

/// Log lines retained per service.
const LOG_CAPACITY: usize = 500;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not found")]
    NotFound,
    #[error("failed to read service definitions: {0}")]
    Load(#[from] std::io::Error),
    #[error("failed to parse service definitions: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid log filter pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Spawn(#[from] SupervisorError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDef {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    service: Vec<ServiceDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    pub id: String,
    pub name: String,
    pub port: Option<u16>,
    pub status: ServiceStatus,
    pub uptime_secs: Option<u64>,
    pub pid: Option<u32>,
}

struct ServiceState {
    status: ServiceStatus,
    started_at: Option<Instant>,
    stopping: bool,
    logs: VecDeque<String>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Stopped,
            started_at: None,
            stopping: false,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }
}

#[derive(Clone)]
pub struct ServiceManager {
    defs: Arc<Vec<ServiceDef>>,
    states: Arc<Mutex<HashMap<String, ServiceState>>>,
    supervisor: Supervisor,
    bus: EventBus,
    ansi: Regex,
}

impl ServiceManager {
    /// Load definitions from `path`. A missing file means no services,
    /// not an error.
    pub fn load(path: &Path, supervisor: Supervisor, bus: EventBus) -> Result<Self, ServiceError> {
        let defs = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str::<ServicesFile>(&raw)?.service,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no services file, running without services");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut states = HashMap::new();
        for def in &defs {
            states.insert(def.id.clone(), ServiceState::default());
        }

        Ok(Self {
            defs: Arc::new(defs),
            states: Arc::new(Mutex::new(states)),
            supervisor,
            bus,
            ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]")?,
        })
    }

    fn def(&self, id: &str) -> Result<&ServiceDef, ServiceError> {
        self.defs
            .iter()
            .find(|d| d.id == id)
            .ok_or(ServiceError::NotFound)
    }

    /// Start a service. Starting one that is already running is a no-op.
    pub async fn start(&self, id: &str) -> Result<(), ServiceError> {
        let def = self.def(id)?.clone();
        let proc_id = proc_id(id);
        if self.supervisor.is_running(&proc_id).await {
            return Ok(());
        }

        {
            let mut states = self.states.lock().await;
            let state = states.entry(id.to_string()).or_default();
            state.status = ServiceStatus::Starting;
            state.stopping = false;
            state.logs.clear();
        }

        let spec = SpawnSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), def.command.clone()],
            cwd: def.cwd.clone(),
            envs: Vec::new(),
        };
        let (_pid, events) = match self.supervisor.start(&proc_id, spec).await {
            Ok(started) => started,
            Err(e) => {
                self.push_log(id, format!("failed to start: {e}")).await;
                self.set_status(id, ServiceStatus::Failed).await;
                self.publish_update().await;
                return Err(e.into());
            }
        };

        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(id) {
                state.status = ServiceStatus::Running;
                state.started_at = Some(Instant::now());
            }
        }
        self.publish_update().await;

        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            manager.consume(&id, events).await;
        });
        Ok(())
    }

    /// Stop a service. Stopping one that is not running is a no-op.
    pub async fn stop(&self, id: &str) -> Result<(), ServiceError> {
        self.def(id)?;
        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(id) {
                state.stopping = true;
            }
        }
        self.supervisor.stop(&proc_id(id)).await;
        Ok(())
    }

    pub async fn restart(&self, id: &str) -> Result<(), ServiceError> {
        self.stop(id).await?;
        // Wait for the old process to leave the registry before respawning.
        let proc_id = proc_id(id);
        for _ in 0..50 {
            if !self.supervisor.is_running(&proc_id).await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        self.start(id).await
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<String>, ServiceError> {
        self.def(id)?;
        let states = self.states.lock().await;
        Ok(states
            .get(id)
            .map(|s| s.logs.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn list(&self) -> Vec<ServiceView> {
        let states = self.states.lock().await;
        let mut views = Vec::with_capacity(self.defs.len());
        for def in self.defs.iter() {
            let state = states.get(&def.id);
            let status = state.map(|s| s.status).unwrap_or(ServiceStatus::Stopped);
            let uptime_secs = match status {
                ServiceStatus::Running => state
                    .and_then(|s| s.started_at)
                    .map(|t| t.elapsed().as_secs()),
                _ => None,
            };
            views.push(ServiceView {
                id: def.id.clone(),
                name: def.name.clone(),
                port: def.port,
                status,
                uptime_secs,
                pid: self.supervisor.running_pid(&proc_id(&def.id)).await,
            });
        }
        views
    }

    pub async fn shutdown(&self) {
        for def in self.defs.iter() {
            let _ = self.stop(&def.id).await;
        }
    }

    async fn consume(&self, id: &str, mut events: tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Line(line) | ProcessEvent::ErrLine(line) => {
                    let clean = self.ansi.replace_all(&line, "").into_owned();
                    self.push_log(id, clean).await;
                }
                ProcessEvent::Exited { code } => {
                    {
                        let mut states = self.states.lock().await;
                        if let Some(state) = states.get_mut(id) {
                            state.status = if state.stopping || code == Some(0) {
                                ServiceStatus::Stopped
                            } else {
                                ServiceStatus::Failed
                            };
                            state.stopping = false;
                            state.started_at = None;
                        }
                    }
                    self.push_log(id, format!("[exited with code {code:?}]")).await;
                    tracing::info!(service = id, ?code, "service exited");
                    self.publish_update().await;
                    break;
                }
            }
        }
    }

    async fn push_log(&self, id: &str, line: String) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(id) {
            if state.logs.len() == LOG_CAPACITY {
                state.logs.pop_front();
            }
            state.logs.push_back(line);
        }
    }

    async fn set_status(&self, id: &str, status: ServiceStatus) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(id) {
            state.status = status;
        }
    }

    async fn publish_update(&self) {
        let services = self
            .list()
            .await
            .into_iter()
            .filter_map(|v| serde_json::to_value(v).ok())
            .collect();
        self.bus.publish(DashboardEvent::ServicesUpdated { services });
    }
}

fn proc_id(service_id: &str) -> String {
    format!("svc:{service_id}")
}
