//! Dashboard chat: one agent process per message, streamed to viewers.
//!
//! A reply may carry `<task_action>` blocks, which let the chat agent drive
//! the task board: create, inspect, cancel, or delete tasks. Actions are
//! executed after the reply is persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::agent::{self, AgentEvent, ContentBlock};
use crate::config::Config;
use crate::events::{DashboardEvent, EventBus};
use crate::store::{ChatSessionRow, NewTask, Store};
use crate::supervisor::{ProcessEvent, SpawnSpec, Supervisor, SupervisorError};
use crate::tasks::TaskManager;

const TITLE_MAX: usize = 80;
const STDERR_TAIL: usize = 20;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat session not found")]
    SessionNotFound,
    #[error("a turn is already running for this session")]
    Busy,
    #[error("invalid task action pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Spawn(#[from] SupervisorError),
}

#[derive(Clone)]
pub struct ChatManager {
    store: Store,
    supervisor: Supervisor,
    bus: EventBus,
    tasks: TaskManager,
    config: Arc<Config>,
    runs: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    action_re: Regex,
}

impl ChatManager {
    pub fn new(
        store: Store,
        supervisor: Supervisor,
        bus: EventBus,
        tasks: TaskManager,
        config: Arc<Config>,
    ) -> Result<Self, ChatError> {
        Ok(Self {
            store,
            supervisor,
            bus,
            tasks,
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
            action_re: Regex::new(r"(?s)<task_action>(.*?)</task_action>")?,
        })
    }

    /// Send a message, creating the session when none is given. The user
    /// message is persisted immediately; the reply streams over the event
    /// bus and is persisted once the turn finishes.
    pub async fn send(
        &self,
        session_id: Option<String>,
        message: String,
        model: Option<String>,
    ) -> Result<ChatSessionRow, ChatError> {
        let session = match session_id {
            Some(id) => self
                .store
                .get_chat_session(&id)
                .await?
                .ok_or(ChatError::SessionNotFound)?,
            None => {
                let title = truncate_title(&message);
                self.store
                    .create_chat_session(&title, model.as_deref())
                    .await?
            }
        };

        let proc_id = proc_id(&session.id);
        if self.supervisor.is_running(&proc_id).await {
            return Err(ChatError::Busy);
        }

        self.store
            .append_chat_message(&session.id, "user", &message, None, None)
            .await?;

        let mut args = vec![
            "-p".to_string(),
            message,
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(token) = &session.resume_token {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        if let Some(model) = &session.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        let spec = SpawnSpec {
            program: self.config.agent_binary.clone(),
            args,
            cwd: None,
            envs: Vec::new(),
        };
        let (_pid, events) = self.supervisor.start(&proc_id, spec).await?;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.runs
            .lock()
            .await
            .insert(session.id.clone(), Arc::clone(&cancelled));

        let manager = self.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.consume(&session_id, cancelled, events).await {
                tracing::error!(session_id = %session_id, error = %e, "chat consumer failed");
            }
        });

        Ok(session)
    }

    /// Abort the in-flight turn. The partial reply is discarded.
    pub async fn cancel(&self, session_id: &str) -> Result<bool, ChatError> {
        let flag = self.runs.lock().await.get(session_id).cloned();
        let Some(flag) = flag else {
            return Ok(false);
        };
        if !self.supervisor.is_running(&proc_id(session_id)).await {
            return Ok(false);
        }
        flag.store(true, Ordering::SeqCst);
        self.supervisor.stop(&proc_id(session_id)).await;
        Ok(true)
    }

    async fn consume(
        &self,
        session_id: &str,
        cancelled: Arc<AtomicBool>,
        mut events: tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> Result<(), ChatError> {
        let mut content = String::new();
        let mut cost_usd: Option<f64> = None;
        let mut duration_ms: Option<i64> = None;
        let mut stderr_tail: Vec<String> = Vec::new();
        let mut exit_code: Option<i32> = None;

        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Line(line) => match agent::parse_line(&line) {
                    Some(AgentEvent::Message { text, .. }) => {
                        self.push_delta(session_id, &mut content, text);
                    }
                    Some(AgentEvent::Assistant { message }) => {
                        for block in message.content {
                            if let ContentBlock::Text { text } = block {
                                self.push_delta(session_id, &mut content, text);
                            }
                        }
                    }
                    Some(
                        AgentEvent::Init { resume_token: token }
                        | AgentEvent::System { session_id: token },
                    ) => {
                        if let Some(token) = token {
                            self.store.set_resume_token(session_id, &token).await?;
                        }
                    }
                    Some(AgentEvent::Result {
                        result,
                        cost_usd: cost,
                        total_cost_usd: total_cost,
                        duration_ms: duration,
                        resume_token,
                        session_id: provider_session,
                    }) => {
                        if content.is_empty() {
                            if let Some(result) = result {
                                content = result;
                            }
                        }
                        cost_usd = cost.or(total_cost);
                        duration_ms = duration;
                        if let Some(token) = resume_token.or(provider_session) {
                            self.store.set_resume_token(session_id, &token).await?;
                        }
                    }
                    _ => {}
                },
                ProcessEvent::ErrLine(line) => {
                    if stderr_tail.len() == STDERR_TAIL {
                        stderr_tail.remove(0);
                    }
                    stderr_tail.push(line);
                }
                ProcessEvent::Exited { code } => {
                    exit_code = code;
                    break;
                }
            }
        }

        self.runs.lock().await.remove(session_id);

        if cancelled.load(Ordering::SeqCst) {
            self.bus.publish(DashboardEvent::ChatCancelled {
                session_id: session_id.to_string(),
            });
            return Ok(());
        }

        if exit_code == Some(0) {
            self.store
                .append_chat_message(session_id, "assistant", &content, cost_usd, duration_ms)
                .await?;
            self.bus.publish(DashboardEvent::ChatComplete {
                session_id: session_id.to_string(),
                content: content.clone(),
                cost_usd,
                duration_ms,
            });
            self.run_task_actions(session_id, &content).await;
        } else {
            let tail = stderr_tail.join("\n");
            let error = if tail.is_empty() {
                format!("Agent exited with code {exit_code:?}")
            } else {
                tail
            };
            self.bus.publish(DashboardEvent::ChatError {
                session_id: session_id.to_string(),
                error,
            });
        }
        Ok(())
    }

    fn push_delta(&self, session_id: &str, content: &mut String, text: String) {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&text);
        self.bus.publish(DashboardEvent::ChatDelta {
            session_id: session_id.to_string(),
            text,
        });
    }

    /// Execute every `<task_action>` block in the finished reply. A bad
    /// block is logged and skipped; it never fails the turn.
    async fn run_task_actions(&self, session_id: &str, content: &str) {
        let payloads: Vec<String> = self
            .action_re
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
            .collect();
        for raw in payloads {
            let payload: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "ignoring malformed task action");
                    continue;
                }
            };
            let action = payload
                .get("action")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Err(e) = self.apply_task_action(session_id, &action, &payload).await {
                tracing::error!(session_id, action, error = %e, "task action failed");
            }
        }
    }

    async fn apply_task_action(
        &self,
        session_id: &str,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ChatError> {
        let str_field = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        match action {
            "create_task" => {
                let title = payload
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Untitled task")
                    .to_string();
                let description = str_field("description");
                let detail = self
                    .store
                    .create_task(NewTask {
                        title: title.clone(),
                        description: description.clone(),
                        source: "chat".to_string(),
                        ..Default::default()
                    })
                    .await?;
                let task_id = detail.task.id.clone();
                self.bus.publish(DashboardEvent::ChatTaskCreated {
                    session_id: session_id.to_string(),
                    task: detail,
                });
                let mut prompt = format!("Use PM: {title}");
                if !description.is_empty() {
                    prompt.push_str(&format!("\n\n{description}"));
                }
                if let Err(e) = self.tasks.run(&task_id, Some(prompt)).await {
                    tracing::error!(task_id, error = %e, "failed to launch chat-created task");
                }
            }
            "list_tasks" => {
                self.bus.publish(DashboardEvent::ChatTaskList {
                    session_id: session_id.to_string(),
                    tasks: self.store.list_root_tasks().await?,
                    query: None,
                });
            }
            "search_tasks" => {
                let query = str_field("query");
                let needle = query.to_lowercase();
                let mut tasks = self.store.list_root_tasks().await?;
                if !needle.is_empty() {
                    tasks.retain(|d| {
                        d.task.title.to_lowercase().contains(&needle)
                            || d.task.description.to_lowercase().contains(&needle)
                    });
                }
                self.bus.publish(DashboardEvent::ChatTaskList {
                    session_id: session_id.to_string(),
                    tasks,
                    query: Some(query),
                });
            }
            "get_task" => {
                let task_id = str_field("task_id");
                self.bus.publish(DashboardEvent::ChatTaskInfo {
                    session_id: session_id.to_string(),
                    task: self.store.get_task(&task_id).await?,
                });
            }
            "cancel_task" => {
                let task_id = str_field("task_id");
                let cancelled = self.tasks.cancel(&task_id).await.unwrap_or(false);
                self.bus.publish(DashboardEvent::ChatTaskCancelled {
                    session_id: session_id.to_string(),
                    task_id,
                    cancelled,
                });
            }
            "delete_task" => {
                let task_id = str_field("task_id");
                let deleted = self.store.delete_task(&task_id).await?;
                self.bus.publish(DashboardEvent::ChatTaskDeleted {
                    session_id: session_id.to_string(),
                    task_id,
                    deleted,
                });
                if deleted {
                    if let Err(e) = self.tasks.publish_snapshot().await {
                        tracing::error!(error = %e, "snapshot publish failed");
                    }
                }
            }
            other => {
                tracing::warn!(session_id, action = other, "unknown task action");
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.runs.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.cancel(&id).await;
        }
    }
}

fn proc_id(session_id: &str) -> String {
    format!("chat:{session_id}")
}

fn truncate_title(message: &str) -> String {
    let message = message.trim();
    if message.chars().count() <= TITLE_MAX {
        message.to_string()
    } else {
        let cut: String = message.chars().take(TITLE_MAX).collect();
        format!("{cut}...")
    }
}
