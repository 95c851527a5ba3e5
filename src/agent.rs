//! Structured stdout protocol spoken by agent processes.
//!
//! Agents emit one JSON object per line, tagged by `type`. Two dialects are
//! accepted: the dashboard's own flat events (`message`, `tool_use`,
//! `question`, `artifact`) and the stream-json shapes the stock agent CLI
//! prints (`system`, `assistant`, `result` with `session_id` and
//! `total_cost_usd`). Lines that fail to parse are not errors: they are
//! plain output and get recorded verbatim as message activity.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Message {
        text: String,
        #[serde(default)]
        agent: Option<String>,
    },
    ToolUse {
        tool: String,
        #[serde(default)]
        detail: Option<String>,
    },
    /// One assistant turn from the stock CLI, carrying content blocks.
    Assistant {
        message: AssistantMessage,
    },
    /// Session bookkeeping line from the stock CLI.
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Tool results echoed back by the stock CLI; carried for completeness
    /// and ignored downstream.
    User,
    Question {
        question: String,
        #[serde(default = "default_question_type")]
        question_type: String,
        #[serde(default)]
        options: Option<Vec<String>>,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        agent: Option<String>,
    },
    Artifact {
        path: String,
        #[serde(default = "default_artifact_type")]
        artifact_type: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<i64>,
        #[serde(default)]
        resume_token: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Init {
        #[serde(default)]
        resume_token: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

fn default_question_type() -> String {
    "text".to_string()
}

fn default_artifact_type() -> String {
    "file".to_string()
}

/// Parse one stdout line. `None` means the line is plain text, including
/// JSON with an unknown `type` tag.
pub fn parse_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
