//! Broadcast fan-out of dashboard events to WebSocket viewers.
//!
//! Events are published after their database commit, so a viewer that
//! re-fetches on receipt always sees the new state. Slow subscribers lag and
//! drop old events rather than backpressure publishers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::{QuestionView, Stats, TaskDetail};

const CHANNEL_CAPACITY: usize = 256;

/// Everything pushed to dashboard viewers, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    TasksUpdated {
        tasks: Vec<TaskDetail>,
    },
    Stats {
        stats: Stats,
    },
    Activity {
        task_id: String,
        event_type: String,
        message: String,
    },
    QuestionCreated {
        question: QuestionView,
    },
    QuestionAnswered {
        question: QuestionView,
    },
    ProcessStatus {
        task_id: String,
        running: bool,
    },
    ServicesUpdated {
        services: Vec<serde_json::Value>,
    },
    ChatDelta {
        session_id: String,
        text: String,
    },
    ChatComplete {
        session_id: String,
        content: String,
        cost_usd: Option<f64>,
        duration_ms: Option<i64>,
    },
    ChatError {
        session_id: String,
        error: String,
    },
    ChatCancelled {
        session_id: String,
    },
    ChatTaskCreated {
        session_id: String,
        task: TaskDetail,
    },
    ChatTaskList {
        session_id: String,
        tasks: Vec<TaskDetail>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    ChatTaskInfo {
        session_id: String,
        task: Option<TaskDetail>,
    },
    ChatTaskCancelled {
        session_id: String,
        task_id: String,
        cancelled: bool,
    },
    ChatTaskDeleted {
        session_id: String,
        task_id: String,
        deleted: bool,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all current subscribers. No subscribers is not an error.
    pub fn publish(&self, event: DashboardEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
