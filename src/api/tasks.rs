//! Task, activity, question, artifact, and stats endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiState};
use crate::store::{
    ActivityRow, ArtifactRow, NewTask, QuestionView, Stats, TaskChanges, TaskDetail,
};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub auto_accept: bool,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn list(State(state): State<ApiState>) -> Result<Json<Vec<TaskDetail>>, ApiError> {
    Ok(Json(state.store.list_root_tasks().await?))
}

pub async fn create(
    State(state): State<ApiState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskDetail>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    if let Some(parent_id) = &req.parent_id {
        let parent = state
            .store
            .get_task(parent_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("parent task not found".to_string()))?;
        // Two levels only: a subtask cannot itself have children.
        if parent.task.parent_id.is_some() {
            return Err(ApiError::BadRequest(
                "subtasks cannot have their own subtasks".to_string(),
            ));
        }
    }

    let detail = state
        .store
        .create_task(NewTask {
            parent_id: req.parent_id,
            title: req.title,
            description: req.description,
            assigned_agent: req.assigned_agent,
            phase: req.phase,
            auto_accept: req.auto_accept,
            source: req.source.unwrap_or_else(|| "dashboard".to_string()),
        })
        .await?;
    state.tasks.publish_snapshot().await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, ApiError> {
    state
        .store
        .get_task(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("task not found".to_string()))
}

pub async fn update(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(changes): Json<TaskChanges>,
) -> Result<Json<TaskDetail>, ApiError> {
    let detail = state
        .store
        .update_task(&id, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound("task not found".to_string()))?;
    state.tasks.publish_snapshot().await?;
    Ok(Json(detail))
}

pub async fn delete(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.tasks.cancel(&id).await? {
        tracing::info!(task_id = %id, "stopped running agent before delete");
    }
    if !state.store.delete_task(&id).await? {
        return Err(ApiError::NotFound("task not found".to_string()));
    }
    state.tasks.publish_snapshot().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub prompt: Option<String>,
}

pub async fn run(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<RunBody>>,
) -> Result<Json<TaskDetail>, ApiError> {
    let prompt = body.and_then(|Json(b)| b.prompt);
    Ok(Json(state.tasks.run(&id, prompt).await?))
}

pub async fn cancel(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stopped = state.tasks.cancel(&id).await?;
    Ok(Json(json!({ "stopped": stopped })))
}

/// Live process state for a task: whether an agent is attached and its pid.
pub async fn process(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_task(&state, &id).await?;
    let (running, pid) = state.tasks.process_status(&id).await;
    Ok(Json(json!({ "task_id": id, "running": running, "pid": pid })))
}

#[derive(Debug, Deserialize)]
pub struct RequestChangesBody {
    pub feedback: String,
}

pub async fn request_changes(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<RequestChangesBody>,
) -> Result<Json<TaskDetail>, ApiError> {
    if body.feedback.trim().is_empty() {
        return Err(ApiError::BadRequest("feedback must not be empty".to_string()));
    }
    Ok(Json(state.tasks.request_changes(&id, &body.feedback).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub include_children: bool,
}

fn default_limit() -> i64 {
    50
}

pub async fn activity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityRow>>, ApiError> {
    ensure_task(&state, &id).await?;
    let rows = state
        .store
        .activity_for_task(&id, query.limit.clamp(1, 500), query.include_children)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct QuestionsQuery {
    #[serde(default)]
    pub pending_only: bool,
    #[serde(default)]
    pub include_children: bool,
}

pub async fn questions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<QuestionsQuery>,
) -> Result<Json<Vec<QuestionView>>, ApiError> {
    ensure_task(&state, &id).await?;
    let rows = state
        .store
        .questions_for_task(&id, query.pending_only, query.include_children)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub answer: String,
}

pub async fn answer_question(
    State(state): State<ApiState>,
    Path((id, qid)): Path<(String, String)>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<QuestionView>, ApiError> {
    if body.answer.trim().is_empty() {
        return Err(ApiError::BadRequest("answer must not be empty".to_string()));
    }
    Ok(Json(state.bridge.answer(&id, &qid, &body.answer).await?))
}

#[derive(Debug, Deserialize)]
pub struct ArtifactsQuery {
    #[serde(default)]
    pub include_children: bool,
}

pub async fn artifacts(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ArtifactsQuery>,
) -> Result<Json<Vec<ArtifactRow>>, ApiError> {
    ensure_task(&state, &id).await?;
    let rows = state
        .store
        .artifacts_for_task(&id, query.include_children)
        .await?;
    Ok(Json(rows))
}

pub async fn get_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ArtifactRow>, ApiError> {
    state
        .store
        .get_artifact(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("artifact not found".to_string()))
}

/// Serve the artifact's file bytes. Paths are resolved and must stay under
/// the server's working directory.
pub async fn artifact_content(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state
        .store
        .get_artifact(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("artifact not found".to_string()))?;

    let root = std::env::current_dir()
        .and_then(|d| d.canonicalize())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let resolved = std::path::Path::new(&artifact.file_path)
        .canonicalize()
        .map_err(|_| ApiError::NotFound("artifact file not found".to_string()))?;
    if !resolved.starts_with(&root) {
        return Err(ApiError::BadRequest(
            "artifact path is outside the workspace".to_string(),
        ));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| ApiError::NotFound("artifact file not found".to_string()))?;
    let mime = artifact
        .mime_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

pub async fn stats(State(state): State<ApiState>) -> Result<Json<Stats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

async fn ensure_task(state: &ApiState, task_id: &str) -> Result<(), ApiError> {
    state
        .store
        .get_task(task_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound("task not found".to_string()))
}
