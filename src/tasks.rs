//! Task lifecycle: launching agent runs, consuming their output, and
//! driving status transitions.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::agent::{self, AgentEvent, ContentBlock};
use crate::config::Config;
use crate::events::{DashboardEvent, EventBus};
use crate::store::{
    ActivityKind, NewQuestion, Store, TaskChanges, TaskDetail, TaskStatus,
};
use crate::supervisor::{ProcessEvent, SpawnSpec, Supervisor, SupervisorError};

/// Lines of stderr kept for the failure result.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found")]
    NotFound,
    #[error("{0}")]
    InvalidState(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Spawn(#[from] SupervisorError),
}

#[derive(Clone)]
pub struct TaskManager {
    store: Store,
    supervisor: Supervisor,
    bus: EventBus,
    config: Arc<Config>,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl TaskManager {
    pub fn new(store: Store, supervisor: Supervisor, bus: EventBus, config: Arc<Config>) -> Self {
        Self {
            store,
            supervisor,
            bus,
            config,
            cancelled: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Launch the agent for a task. If a process is already running for it,
    /// this is a no-op that returns the current state. A caller-supplied
    /// prompt replaces the one built from the task's context.
    pub async fn run(
        &self,
        task_id: &str,
        prompt_override: Option<String>,
    ) -> Result<TaskDetail, TaskError> {
        let detail = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound)?;

        let prompt = match prompt_override {
            Some(prompt) => prompt,
            None => self.build_prompt(&detail).await?,
        };
        let base_url = format!("http://{}:{}", self.config.host, self.config.port);
        let spec = SpawnSpec {
            program: self.config.agent_binary.clone(),
            args: vec![
                "-p".to_string(),
                prompt,
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            cwd: None,
            envs: vec![
                ("DASHBOARD_TASK_ID".to_string(), task_id.to_string()),
                ("DASHBOARD_BASE_URL".to_string(), base_url),
            ],
        };

        let (pid, events) = match self.supervisor.start(task_id, spec).await {
            Ok(started) => started,
            // Registration is the single arbiter: a concurrent run (or a
            // still-live earlier one) already owns the task, so this call
            // is a no-op that reports the current state.
            Err(SupervisorError::AlreadyRunning(_)) => {
                tracing::debug!(task_id, "run requested but process already live");
                return self
                    .store
                    .get_task(task_id)
                    .await?
                    .ok_or(TaskError::NotFound);
            }
            Err(e) => {
                self.store
                    .update_task(
                        task_id,
                        TaskChanges {
                            status: Some(TaskStatus::Failed),
                            result: Some(format!("Failed to launch agent: {e}")),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.record_activity(
                    task_id,
                    ActivityKind::Error,
                    None,
                    &format!("Failed to launch agent: {e}"),
                )
                .await?;
                self.publish_snapshot().await?;
                return Err(e.into());
            }
        };
        self.cancelled.lock().await.remove(task_id);

        self.store
            .update_task(task_id, TaskChanges::status(TaskStatus::InProgress))
            .await?;
        self.store.set_task_pid(task_id, Some(i64::from(pid))).await?;
        self.bus.publish(DashboardEvent::ProcessStatus {
            task_id: task_id.to_string(),
            running: true,
        });
        self.publish_snapshot().await?;

        let manager = self.clone();
        let consumer_id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = manager.consume(&consumer_id, events).await {
                tracing::error!(task_id = %consumer_id, error = %e, "task consumer failed");
            }
        });

        self.store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound)
    }

    /// Stop a running task. Returns false when no process is live for it.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, TaskError> {
        if !self.supervisor.is_running(task_id).await {
            return Ok(false);
        }
        self.cancelled.lock().await.insert(task_id.to_string());
        self.supervisor.stop(task_id).await;
        Ok(true)
    }

    /// Whether an agent process is live for the task, and its pid.
    pub async fn process_status(&self, task_id: &str) -> (bool, Option<u32>) {
        let pid = self.supervisor.running_pid(task_id).await;
        (pid.is_some(), pid)
    }

    /// Send a completed or failed task back to pending with reviewer
    /// feedback attached.
    pub async fn request_changes(
        &self,
        task_id: &str,
        feedback: &str,
    ) -> Result<TaskDetail, TaskError> {
        let detail = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound)?;
        if !detail.task.status.is_terminal() {
            return Err(TaskError::InvalidState(format!(
                "changes can only be requested on a finished task (status is {})",
                detail.task.status.as_str()
            )));
        }

        let detail = self
            .store
            .reopen_task(task_id, feedback)
            .await?
            .ok_or(TaskError::NotFound)?;
        self.publish_snapshot().await?;
        Ok(detail)
    }

    /// Reconcile tasks left in_progress by a previous server run. Dead pids
    /// become failed; live pids are noted but left alone.
    pub async fn recover_orphans(&self) -> Result<(), TaskError> {
        for task in self.store.orphaned_tasks().await? {
            let pid = task.pid.unwrap_or(0);
            let alive = pid > 0 && crate::supervisor::pid_alive(pid as u32);
            if alive {
                tracing::warn!(task_id = %task.id, pid, "orphaned agent still running");
                self.store
                    .log_activity(
                        &task.id,
                        ActivityKind::Error,
                        None,
                        &format!("Server restarted while agent (pid {pid}) was still running"),
                        None,
                    )
                    .await?;
            } else {
                tracing::info!(task_id = %task.id, pid, "marking orphaned task failed");
                self.store
                    .update_task(
                        &task.id,
                        TaskChanges {
                            status: Some(TaskStatus::Failed),
                            result: Some("Agent process lost during server restart".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.store.set_task_pid(&task.id, None).await?;
            }
        }
        Ok(())
    }

    /// Stop all live agent processes. Tasks still in_progress are marked
    /// failed so the dashboard never shows phantom activity after restart.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        let tasks = match self.store.list_root_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "shutdown: failed to list tasks");
                return;
            }
        };
        for detail in tasks {
            let mut all = vec![detail.task];
            all.extend(detail.children);
            for task in all {
                if task.status == TaskStatus::InProgress {
                    let result = self
                        .store
                        .update_task(
                            &task.id,
                            TaskChanges {
                                status: Some(TaskStatus::Failed),
                                result: Some("Server shut down".to_string()),
                                ..Default::default()
                            },
                        )
                        .await;
                    if let Err(e) = result {
                        tracing::error!(task_id = %task.id, error = %e, "shutdown: update failed");
                    }
                }
            }
        }
    }

    /// Re-broadcast the full task list and stats. Called after any
    /// task-mutating commit.
    pub async fn publish_snapshot(&self) -> Result<(), sqlx::Error> {
        let tasks = self.store.list_root_tasks().await?;
        let stats = self.store.stats().await?;
        self.bus.publish(DashboardEvent::TasksUpdated { tasks });
        self.bus.publish(DashboardEvent::Stats { stats });
        Ok(())
    }

    async fn build_prompt(&self, detail: &TaskDetail) -> Result<String, sqlx::Error> {
        let task = &detail.task;
        let mut prompt = format!("# Task: {}\n\n{}\n", task.title, task.description);

        if let Some(parent_id) = &task.parent_id {
            if let Some(parent) = self.store.get_task(parent_id).await? {
                prompt.push_str(&format!(
                    "\nThis is a subtask of: {}\n{}\n",
                    parent.task.title, parent.task.description
                ));
            }
        }
        if !detail.children.is_empty() {
            prompt.push_str("\nSubtasks:\n");
            for child in &detail.children {
                prompt.push_str(&format!(
                    "- [{}] {}\n",
                    child.status.as_str(),
                    child.title
                ));
            }
        }

        if task.revision_count > 0 {
            let activity = self.store.activity_for_task(&task.id, 50, false).await?;
            if let Some(feedback) = activity
                .iter()
                .find(|a| {
                    a.event_type == ActivityKind::Message
                        && a.message.starts_with("Changes requested:")
                })
                .map(|a| a.message.trim_start_matches("Changes requested:").trim())
            {
                prompt.push_str(&format!("\nReviewer feedback on the last run:\n{feedback}\n"));
            }
        }
        Ok(prompt)
    }

    /// Drain the process event stream, translating agent protocol lines into
    /// store writes and dashboard events, then finalize on exit.
    async fn consume(
        &self,
        task_id: &str,
        mut events: tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> Result<(), TaskError> {
        let mut stderr_tail: Vec<String> = Vec::new();
        let mut agent_result: Option<String> = None;
        let mut exit_code: Option<i32> = None;

        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Line(line) => match agent::parse_line(&line) {
                    Some(event) => {
                        if let Some(result) = self.handle_agent_event(task_id, event).await? {
                            agent_result = Some(result);
                        }
                    }
                    None => {
                        // Narration is held back while a question is open so
                        // the answer entry lands right after the question.
                        if !line.trim().is_empty() && !self.is_suspended(task_id).await? {
                            self.record_activity(
                                task_id,
                                ActivityKind::Message,
                                None,
                                &line,
                            )
                            .await?;
                        }
                    }
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

        self.finalize(task_id, exit_code, agent_result, stderr_tail)
            .await
    }

    /// True while the task has an unanswered question.
    async fn is_suspended(&self, task_id: &str) -> Result<bool, sqlx::Error> {
        Ok(self.store.pending_question_count(task_id).await? > 0)
    }

    /// Returns the result text when the event carries one.
    async fn handle_agent_event(
        &self,
        task_id: &str,
        event: AgentEvent,
    ) -> Result<Option<String>, TaskError> {
        match event {
            AgentEvent::Message { text, agent } => {
                if !self.is_suspended(task_id).await? {
                    self.record_activity(task_id, ActivityKind::Message, agent.as_deref(), &text)
                        .await?;
                }
            }
            AgentEvent::ToolUse { tool, detail } => {
                if !self.is_suspended(task_id).await? {
                    let message = match detail {
                        Some(detail) => format!("{tool}: {detail}"),
                        None => tool,
                    };
                    self.record_activity(task_id, ActivityKind::ToolUse, None, &message)
                        .await?;
                }
            }
            AgentEvent::Assistant { message } => {
                if !self.is_suspended(task_id).await? {
                    for block in message.content {
                        match block {
                            ContentBlock::Text { text } => {
                                self.record_activity(
                                    task_id,
                                    ActivityKind::Message,
                                    None,
                                    &text,
                                )
                                .await?;
                            }
                            ContentBlock::ToolUse { name, input } => {
                                self.record_activity(
                                    task_id,
                                    ActivityKind::ToolUse,
                                    None,
                                    &describe_tool_use(&name, &input),
                                )
                                .await?;
                            }
                            ContentBlock::Other => {}
                        }
                    }
                }
            }
            AgentEvent::System { .. } | AgentEvent::User => {}
            AgentEvent::Question {
                question,
                question_type,
                options,
                context,
                agent,
            } => {
                self.handle_question(task_id, question, question_type, options, context, agent)
                    .await?;
            }
            AgentEvent::Artifact {
                path,
                artifact_type,
                label,
                metadata,
            } => {
                let label = label.unwrap_or_else(|| path.clone());
                let mime = mime_for_path(&path);
                let artifact = self
                    .store
                    .create_artifact(task_id, &artifact_type, &label, &path, mime, metadata)
                    .await?;
                self.bus.publish(DashboardEvent::Activity {
                    task_id: task_id.to_string(),
                    event_type: "artifact".to_string(),
                    message: format!("Artifact added: {}", artifact.label),
                });
            }
            AgentEvent::Result { result, .. } => {
                return Ok(result);
            }
            AgentEvent::Init { .. } => {}
        }
        Ok(None)
    }

    async fn handle_question(
        &self,
        task_id: &str,
        question: String,
        question_type: String,
        options: Option<Vec<String>>,
        context: Option<String>,
        agent: Option<String>,
    ) -> Result<(), TaskError> {
        let detail = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound)?;

        let created = self
            .store
            .create_question(NewQuestion {
                task_id: task_id.to_string(),
                question,
                question_type: question_type.clone(),
                options: options.clone(),
                context,
                agent,
            })
            .await?;

        if detail.task.auto_accept {
            let answer = default_answer(&question_type, options.as_deref());
            let answered = self
                .store
                .answer_question(&created.id, &answer, true)
                .await?;
            if let Some(question) = answered {
                self.bus
                    .publish(DashboardEvent::QuestionAnswered { question });
            }
        } else {
            self.store
                .update_task(task_id, TaskChanges::status(TaskStatus::Blocked))
                .await?;
            self.bus
                .publish(DashboardEvent::QuestionCreated { question: created });
        }
        self.publish_snapshot().await?;
        Ok(())
    }

    async fn finalize(
        &self,
        task_id: &str,
        exit_code: Option<i32>,
        agent_result: Option<String>,
        stderr_tail: Vec<String>,
    ) -> Result<(), TaskError> {
        let cancelled = self.cancelled.lock().await.remove(task_id);

        let (status, result, entry) = if cancelled {
            (
                TaskStatus::Failed,
                Some("Cancelled by user".to_string()),
                "Task cancelled".to_string(),
            )
        } else if exit_code == Some(0) {
            (
                TaskStatus::Completed,
                agent_result.or(Some("Completed".to_string())),
                "Agent finished successfully".to_string(),
            )
        } else {
            let tail = stderr_tail.join("\n");
            let result = if tail.is_empty() {
                format!("Agent exited with code {exit_code:?}")
            } else {
                tail
            };
            (
                TaskStatus::Failed,
                Some(result),
                format!("Agent exited with code {exit_code:?}"),
            )
        };

        self.store
            .update_task(
                task_id,
                TaskChanges {
                    status: Some(status),
                    result,
                    ..Default::default()
                },
            )
            .await?;
        self.store.set_task_pid(task_id, None).await?;

        let kind = if status == TaskStatus::Completed {
            ActivityKind::Message
        } else {
            ActivityKind::Error
        };
        self.record_activity(task_id, kind, None, &entry).await?;

        self.bus.publish(DashboardEvent::ProcessStatus {
            task_id: task_id.to_string(),
            running: false,
        });
        self.publish_snapshot().await?;
        Ok(())
    }

    async fn record_activity(
        &self,
        task_id: &str,
        kind: ActivityKind,
        agent: Option<&str>,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        let row = self
            .store
            .log_activity(task_id, kind, agent, message, None)
            .await?;
        self.bus.publish(DashboardEvent::Activity {
            task_id: task_id.to_string(),
            event_type: row.event_type.as_str().to_string(),
            message: row.message,
        });
        Ok(())
    }
}

/// Synthesized answer used when a task runs with auto-accept on.
pub fn default_answer(question_type: &str, options: Option<&[String]>) -> String {
    if let Some(first) = options.and_then(|o| o.first()) {
        return first.clone();
    }
    if question_type == "plan_review" {
        "approved".to_string()
    } else {
        "yes".to_string()
    }
}

/// Activity line for a tool-use content block. Subagent launches get their
/// description appended, since the bare tool name says nothing.
fn describe_tool_use(name: &str, input: &serde_json::Value) -> String {
    let mut message = format!("Using tool: {name}");
    if name == "Task" {
        if let Some(desc) = input.get("description").and_then(|v| v.as_str()) {
            message.push_str(&format!(" ({desc})"));
        }
    }
    message
}

/// MIME type for an artifact path, from its extension.
fn mime_for_path(path: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(path).extension()?.to_str()?;
    match ext.to_ascii_lowercase().as_str() {
        "md" | "markdown" => Some("text/markdown"),
        "txt" | "log" => Some("text/plain"),
        "html" | "htm" => Some("text/html"),
        "css" => Some("text/css"),
        "js" => Some("text/javascript"),
        "json" => Some("application/json"),
        "toml" => Some("text/toml"),
        "yaml" | "yml" => Some("text/yaml"),
        "csv" => Some("text/csv"),
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}
