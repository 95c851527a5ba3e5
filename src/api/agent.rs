//! Endpoint spoken by agent processes themselves.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiState};
use crate::store::NewQuestion;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub task_id: String,
    pub question: String,
    #[serde(default = "default_question_type")]
    pub question_type: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

fn default_question_type() -> String {
    "text".to_string()
}

/// Blocks until the question is answered (by a human, auto-accept, or
/// timeout) and returns the answer. Agents call this and wait.
pub async fn ask(
    State(state): State<ApiState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let answered = state
        .bridge
        .ask(NewQuestion {
            task_id: req.task_id,
            question: req.question,
            question_type: req.question_type,
            options: req.options,
            context: req.context,
            agent: req.agent,
        })
        .await?;

    Ok(Json(json!({
        "question_id": answered.id,
        "answer": answered.answer,
        "auto_accepted": answered.auto_accepted,
    })))
}
