//! Service control endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiState};
use crate::services::ServiceView;

pub async fn list(State(state): State<ApiState>) -> Json<Vec<ServiceView>> {
    Json(state.services.list().await)
}

pub async fn start(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.services.start(&id).await?;
    Ok(Json(json!({ "started": true })))
}

pub async fn stop(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.services.stop(&id).await?;
    Ok(Json(json!({ "stopped": true })))
}

pub async fn restart(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.services.restart(&id).await?;
    Ok(Json(json!({ "restarted": true })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Most recent log lines, oldest first, optionally capped to the last
/// `limit` lines.
pub async fn logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut lines = state.services.logs(&id).await?;
    if let Some(limit) = query.limit {
        if lines.len() > limit {
            lines.drain(..lines.len() - limit);
        }
    }
    Ok(Json(lines))
}
