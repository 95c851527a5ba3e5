//! Bridge between the blocking ask-the-human protocol and the store.
//!
//! An agent's ask request parks inside its HTTP handler and polls the store
//! until someone answers, the timeout fires, or auto-accept short-circuits
//! the wait. Cross-process signalling goes through SQLite rows only, so an
//! answer written by any server instance unblocks the asker.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::config::Config;
use crate::events::{DashboardEvent, EventBus};
use crate::store::{NewQuestion, QuestionView, Store, TaskChanges, TaskStatus};
use crate::tasks::{default_answer, TaskManager};

/// Answer recorded when the wait expires with nobody responding. The agent
/// sees the marker and decides for itself how to proceed.
pub const TIMEOUT_ANSWER: &str = "[TIMEOUT - no answer received]";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("task not found")]
    TaskNotFound,
    #[error("question not found or already answered")]
    QuestionNotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct QuestionBridge {
    store: Store,
    bus: EventBus,
    tasks: TaskManager,
    config: Arc<Config>,
}

impl QuestionBridge {
    pub fn new(store: Store, bus: EventBus, tasks: TaskManager, config: Arc<Config>) -> Self {
        Self {
            store,
            bus,
            tasks,
            config,
        }
    }

    /// Ask on behalf of an agent and wait for the answer. The call returns
    /// only once the question is answered, auto-accepted, or timed out.
    pub async fn ask(&self, new: NewQuestion) -> Result<QuestionView, BridgeError> {
        let detail = self
            .store
            .get_task(&new.task_id)
            .await?
            .ok_or(BridgeError::TaskNotFound)?;
        let task_id = new.task_id.clone();
        let question_type = new.question_type.clone();
        let options = new.options.clone();

        let created = self.store.create_question(new).await?;

        if detail.task.auto_accept {
            let answer = default_answer(&question_type, options.as_deref());
            let answered = self
                .store
                .answer_question(&created.id, &answer, true)
                .await?
                .ok_or(BridgeError::QuestionNotFound)?;
            self.bus.publish(DashboardEvent::QuestionAnswered {
                question: answered.clone(),
            });
            if let Err(e) = self.tasks.publish_snapshot().await {
                tracing::error!(error = %e, "snapshot publish failed");
            }
            return Ok(answered);
        }

        self.store
            .update_task(&task_id, TaskChanges::status(TaskStatus::Blocked))
            .await?;
        self.bus.publish(DashboardEvent::QuestionCreated {
            question: created.clone(),
        });
        if let Err(e) = self.tasks.publish_snapshot().await {
            tracing::error!(error = %e, "snapshot publish failed");
        }

        let started = Instant::now();
        loop {
            tokio::time::sleep(self.config.question_poll_interval).await;

            let current = self
                .store
                .get_question(&created.id)
                .await?
                .ok_or(BridgeError::QuestionNotFound)?;
            if current.answer.is_some() {
                return Ok(current);
            }

            // Cancellation moves the task out of blocked; stop waiting.
            let task = self
                .store
                .get_task(&task_id)
                .await?
                .ok_or(BridgeError::TaskNotFound)?;
            if task.task.status != TaskStatus::Blocked {
                tracing::info!(question_id = %created.id, task_id = %task_id, "task left blocked, abandoning wait");
                let current = self
                    .store
                    .get_question(&created.id)
                    .await?
                    .ok_or(BridgeError::QuestionNotFound)?;
                return Ok(current);
            }

            if started.elapsed() >= self.config.question_timeout {
                tracing::warn!(question_id = %created.id, task_id = %task_id, "question timed out");
                let answered = self
                    .store
                    .answer_question(&created.id, TIMEOUT_ANSWER, false)
                    .await?;
                // A human answer racing the timeout wins; re-read either way.
                let current = self
                    .store
                    .get_question(&created.id)
                    .await?
                    .ok_or(BridgeError::QuestionNotFound)?;
                if let Some(question) = answered {
                    self.bus
                        .publish(DashboardEvent::QuestionAnswered { question });
                }
                self.unblock_if_clear(&task_id).await?;
                return Ok(current);
            }
        }
    }

    /// Record a human answer and lift the block if no other questions are
    /// pending for the task.
    pub async fn answer(
        &self,
        task_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<QuestionView, BridgeError> {
        let answered = self
            .store
            .answer_question(question_id, answer, false)
            .await?
            .ok_or(BridgeError::QuestionNotFound)?;
        if answered.task_id != task_id {
            return Err(BridgeError::QuestionNotFound);
        }

        self.bus.publish(DashboardEvent::QuestionAnswered {
            question: answered.clone(),
        });
        self.unblock_if_clear(task_id).await?;
        Ok(answered)
    }

    async fn unblock_if_clear(&self, task_id: &str) -> Result<(), sqlx::Error> {
        if self.store.pending_question_count(task_id).await? == 0 {
            let detail = self.store.get_task(task_id).await?;
            if let Some(detail) = detail {
                if detail.task.status == TaskStatus::Blocked {
                    self.store
                        .update_task(task_id, TaskChanges::status(TaskStatus::InProgress))
                        .await?;
                }
            }
        }
        if let Err(e) = self.tasks.publish_snapshot().await {
            tracing::error!(error = %e, "snapshot publish failed");
        }
        Ok(())
    }
}
