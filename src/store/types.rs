//! Row types and JSON views shared by the store, managers, and API.

use serde::{Deserialize, Serialize};

/// Task lifecycle states.
///
/// pending → in_progress → completed/failed, with a blocked detour while an
/// unanswered question exists. completed/failed → pending again via
/// request-changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub phase: Option<String>,
    pub assigned_agent: Option<String>,
    pub result: Option<String>,
    pub pid: Option<i64>,
    pub auto_accept: bool,
    pub source: String,
    pub revision_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A task as returned by the API: the row plus its direct children and the
/// count of unanswered questions. Children are embedded on read; there is no
/// separate aggregation table.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: TaskRow,
    pub children: Vec<TaskRow>,
    pub pending_questions: i64,
}

/// Fields for creating a task. `id` is generated when absent.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub parent_id: Option<String>,
    pub title: String,
    pub description: String,
    pub assigned_agent: Option<String>,
    pub phase: Option<String>,
    pub auto_accept: bool,
    pub source: String,
}

/// Partial update for a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskChanges {
    pub status: Option<TaskStatus>,
    pub phase: Option<String>,
    pub result: Option<String>,
    pub assigned_agent: Option<String>,
}

impl TaskChanges {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.phase.is_none()
            && self.result.is_none()
            && self.assigned_agent.is_none()
    }
}

/// Append-only activity log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    StatusChange,
    PhaseChange,
    Message,
    ToolUse,
    Question,
    Answer,
    Artifact,
    Error,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Created => "created",
            ActivityKind::StatusChange => "status_change",
            ActivityKind::PhaseChange => "phase_change",
            ActivityKind::Message => "message",
            ActivityKind::ToolUse => "tool_use",
            ActivityKind::Question => "question",
            ActivityKind::Answer => "answer",
            ActivityKind::Artifact => "artifact",
            ActivityKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub task_id: String,
    pub event_type: ActivityKind,
    pub agent: Option<String>,
    pub message: String,
    pub metadata: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: String,
    pub task_id: String,
    pub agent: Option<String>,
    pub question: String,
    pub question_type: String,
    pub options: Option<String>,
    pub context: Option<String>,
    pub answer: Option<String>,
    pub answered_at: Option<String>,
    pub auto_accepted: bool,
    pub created_at: String,
}

/// Question with `options` decoded from its stored JSON text.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub task_id: String,
    pub agent: Option<String>,
    pub question: String,
    pub question_type: String,
    pub options: Option<Vec<String>>,
    pub context: Option<String>,
    pub answer: Option<String>,
    pub answered_at: Option<String>,
    pub auto_accepted: bool,
    pub created_at: String,
}

impl From<QuestionRow> for QuestionView {
    fn from(row: QuestionRow) -> Self {
        let options = row
            .options
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: row.id,
            task_id: row.task_id,
            agent: row.agent,
            question: row.question,
            question_type: row.question_type,
            options,
            context: row.context,
            answer: row.answer,
            answered_at: row.answered_at,
            auto_accepted: row.auto_accepted,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewQuestion {
    pub task_id: String,
    pub question: String,
    pub question_type: String,
    pub options: Option<Vec<String>>,
    pub context: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ArtifactRow {
    pub id: String,
    pub task_id: String,
    pub artifact_type: String,
    pub label: String,
    pub file_path: String,
    pub mime_type: Option<String>,
    pub metadata: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatSessionRow {
    pub id: String,
    pub title: String,
    pub resume_token: Option<String>,
    pub model: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
}

/// Aggregate counts pushed to every viewer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub blocked: i64,
    pub pending_questions: i64,
}
