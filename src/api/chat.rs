//! Chat session endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ApiError, ApiState};
use crate::store::{ChatMessageRow, ChatSessionRow};

pub async fn list_sessions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ChatSessionRow>>, ApiError> {
    Ok(Json(state.store.list_chat_sessions().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ChatSessionRow>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let session = state
        .store
        .create_chat_session(&req.title, req.model.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ChatSessionRow,
    pub messages: Vec<ChatMessageRow>,
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = state
        .store
        .get_chat_session(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat session not found".to_string()))?;
    let messages = state.store.chat_messages(&id).await?;
    Ok(Json(SessionDetail { session, messages }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

pub async fn update_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<ChatSessionRow>, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    state
        .store
        .rename_chat_session(&id, &req.title)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("chat session not found".to_string()))
}

pub async fn messages(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatMessageRow>>, ApiError> {
    state
        .store
        .get_chat_session(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat session not found".to_string()))?;
    Ok(Json(state.store.chat_messages(&id).await?))
}

pub async fn delete_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _ = state.chat.cancel(&id).await?;
    if !state.store.delete_chat_session(&id).await? {
        return Err(ApiError::NotFound("chat session not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Accepts the message and returns the session immediately; the reply
/// streams over the WebSocket as chat_delta/chat_complete events.
pub async fn send(
    State(state): State<ApiState>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<ChatSessionRow>), ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let session = state
        .chat
        .send(req.session_id, req.message, req.model)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

pub async fn cancel(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.chat.cancel(&id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}
