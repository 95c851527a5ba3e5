//! HTTP and WebSocket surface.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::chat::{ChatError, ChatManager};
use crate::config::Config;
use crate::events::EventBus;
use crate::questions::{BridgeError, QuestionBridge};
use crate::services::{ServiceError, ServiceManager};
use crate::store::Store;
use crate::supervisor::SupervisorError;
use crate::tasks::{TaskError, TaskManager};

pub mod agent;
pub mod chat;
pub mod services;
pub mod tasks;
pub mod websocket;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub tasks: TaskManager,
    pub chat: ChatManager,
    pub services: ServiceManager,
    pub bridge: QuestionBridge,
    pub bus: EventBus,
    pub config: Arc<Config>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(message) = &self {
            tracing::error!(error = %message, "request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound => ApiError::NotFound("task not found".to_string()),
            TaskError::InvalidState(msg) => ApiError::Conflict(msg),
            TaskError::Db(e) => e.into(),
            TaskError::Spawn(SupervisorError::AlreadyRunning(id)) => {
                ApiError::Conflict(format!("a process is already running for '{id}'"))
            }
            TaskError::Spawn(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::TaskNotFound => ApiError::NotFound("task not found".to_string()),
            BridgeError::QuestionNotFound => {
                ApiError::NotFound("question not found or already answered".to_string())
            }
            BridgeError::Db(e) => e.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::SessionNotFound => {
                ApiError::NotFound("chat session not found".to_string())
            }
            ChatError::Busy => {
                ApiError::Conflict("a turn is already running for this session".to_string())
            }
            ChatError::Db(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound => ApiError::NotFound("service not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::ws_handler))
        .route("/api/stats", get(tasks::stats))
        .route("/api/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_one)
                .patch(tasks::update)
                .delete(tasks::delete),
        )
        .route("/api/tasks/{id}/run", post(tasks::run))
        .route("/api/tasks/{id}/cancel", post(tasks::cancel))
        .route("/api/tasks/{id}/process", get(tasks::process))
        .route("/api/tasks/{id}/request-changes", post(tasks::request_changes))
        .route("/api/tasks/{id}/activity", get(tasks::activity))
        .route("/api/tasks/{id}/questions", get(tasks::questions))
        .route(
            "/api/tasks/{id}/questions/{qid}/answer",
            post(tasks::answer_question),
        )
        .route("/api/tasks/{id}/artifacts", get(tasks::artifacts))
        .route("/api/artifacts/{id}", get(tasks::get_artifact))
        .route("/api/artifacts/{id}/content", get(tasks::artifact_content))
        .route("/api/services", get(services::list))
        .route("/api/services/{id}/start", post(services::start))
        .route("/api/services/{id}/stop", post(services::stop))
        .route("/api/services/{id}/restart", post(services::restart))
        .route("/api/services/{id}/logs", get(services::logs))
        .route(
            "/api/chat/sessions",
            get(chat::list_sessions).post(chat::create_session),
        )
        .route(
            "/api/chat/sessions/{id}",
            get(chat::get_session)
                .patch(chat::update_session)
                .delete(chat::delete_session),
        )
        .route("/api/chat/sessions/{id}/messages", get(chat::messages))
        .route("/api/chat/send", post(chat::send))
        .route("/api/chat/sessions/{id}/cancel", post(chat::cancel))
        .route("/api/agent/ask", post(agent::ask))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
