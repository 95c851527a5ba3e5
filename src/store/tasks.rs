//! Task, activity, question, and artifact queries.

use sqlx::{Executor, Sqlite};

use super::types::*;
use super::{now_iso, short_id, Store};

impl Store {
    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn create_task(&self, new: NewTask) -> Result<TaskDetail, sqlx::Error> {
        let id = short_id();
        let now = now_iso();

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO tasks (id, parent_id, title, description, assigned_agent, phase,
                                auto_accept, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.parent_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.assigned_agent)
        .bind(&new.phase)
        .bind(new.auto_accept)
        .bind(&new.source)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        insert_activity(
            &mut *tx,
            &id,
            ActivityKind::Created,
            new.assigned_agent.as_deref(),
            &format!("Task created: {}", new.title),
            None,
        )
        .await?;
        tx.commit().await?;

        self.get_task(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Apply a partial update. Status and phase changes are logged as
    /// activity entries inside the same transaction.
    pub async fn update_task(
        &self,
        task_id: &str,
        changes: TaskChanges,
    ) -> Result<Option<TaskDetail>, sqlx::Error> {
        if changes.is_empty() {
            return self.get_task(task_id).await;
        }

        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE tasks SET
                 status = COALESCE(?, status),
                 phase = COALESCE(?, phase),
                 result = COALESCE(?, result),
                 assigned_agent = COALESCE(?, assigned_agent),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(changes.status)
        .bind(&changes.phase)
        .bind(&changes.result)
        .bind(&changes.assigned_agent)
        .bind(now_iso())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(status) = changes.status {
            insert_activity(
                &mut *tx,
                task_id,
                ActivityKind::StatusChange,
                changes.assigned_agent.as_deref(),
                &format!("Status changed to {}", status.as_str()),
                None,
            )
            .await?;
        }
        if let Some(phase) = &changes.phase {
            insert_activity(
                &mut *tx,
                task_id,
                ActivityKind::PhaseChange,
                changes.assigned_agent.as_deref(),
                &format!("Phase changed to {phase}"),
                None,
            )
            .await?;
        }
        tx.commit().await?;

        self.get_task(task_id).await
    }

    pub async fn set_task_pid(&self, task_id: &str, pid: Option<i64>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET pid = ?, updated_at = ? WHERE id = ?")
            .bind(pid)
            .bind(now_iso())
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Reset a terminal task to pending, recording the feedback and bumping
    /// the revision counter, all in one transaction.
    pub async fn reopen_task(
        &self,
        task_id: &str,
        feedback: &str,
    ) -> Result<Option<TaskDetail>, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', result = NULL,
                              revision_count = revision_count + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(now_iso())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        insert_activity(
            &mut *tx,
            task_id,
            ActivityKind::Message,
            None,
            &format!("Changes requested: {feedback}"),
            None,
        )
        .await?;
        insert_activity(
            &mut *tx,
            task_id,
            ActivityKind::StatusChange,
            None,
            "Status changed to pending",
            None,
        )
        .await?;
        tx.commit().await?;

        self.get_task(task_id).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskDetail>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(self.pool())
            .await?;
        let Some(task) = row else {
            return Ok(None);
        };
        Ok(Some(self.with_children(task).await?))
    }

    /// Root tasks (no parent), newest first, each with embedded children.
    pub async fn list_root_tasks(&self) -> Result<Vec<TaskDetail>, sqlx::Error> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE parent_id IS NULL ORDER BY created_at DESC, id",
        )
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for task in rows {
            out.push(self.with_children(task).await?);
        }
        Ok(out)
    }

    async fn with_children(&self, task: TaskRow) -> Result<TaskDetail, sqlx::Error> {
        let children: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE parent_id = ? ORDER BY created_at, id")
                .bind(&task.id)
                .fetch_all(self.pool())
                .await?;
        let pending_questions = self.pending_question_count(&task.id).await?;
        Ok(TaskDetail {
            task,
            children,
            pending_questions,
        })
    }

    /// Deletes a task; children and dependent rows cascade.
    pub async fn delete_task(&self, task_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tasks left in_progress with a recorded pid — candidates for orphan
    /// recovery after a server restart.
    pub async fn orphaned_tasks(&self) -> Result<Vec<TaskRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tasks WHERE status = 'in_progress' AND pid IS NOT NULL")
            .fetch_all(self.pool())
            .await
    }

    pub async fn stats(&self) -> Result<Stats, sqlx::Error> {
        let counts: Vec<(TaskStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut stats = Stats::default();
        for (status, count) in counts {
            stats.total += count;
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::InProgress => stats.in_progress = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
                TaskStatus::Blocked => stats.blocked = count,
            }
        }

        let (pending_questions,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM questions WHERE answer IS NULL")
                .fetch_one(self.pool())
                .await?;
        stats.pending_questions = pending_questions;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    pub async fn log_activity(
        &self,
        task_id: &str,
        kind: ActivityKind,
        agent: Option<&str>,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<ActivityRow, sqlx::Error> {
        let id = insert_activity(self.pool(), task_id, kind, agent, message, metadata).await?;
        sqlx::query_as("SELECT * FROM activity_log WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await
    }

    /// Most recent entries for a task, optionally including its children.
    pub async fn activity_for_task(
        &self,
        task_id: &str,
        limit: i64,
        include_children: bool,
    ) -> Result<Vec<ActivityRow>, sqlx::Error> {
        if include_children {
            sqlx::query_as(
                "SELECT a.* FROM activity_log a
                 WHERE a.task_id = ? OR a.task_id IN (SELECT id FROM tasks WHERE parent_id = ?)
                 ORDER BY a.id DESC LIMIT ?",
            )
            .bind(task_id)
            .bind(task_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query_as(
                "SELECT * FROM activity_log WHERE task_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(task_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
        }
    }

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    pub async fn create_question(&self, new: NewQuestion) -> Result<QuestionView, sqlx::Error> {
        let id = short_id();
        let options_json = match &new.options {
            Some(options) => Some(
                serde_json::to_string(options)
                    .map_err(|e| sqlx::Error::Encode(Box::new(e)))?,
            ),
            None => None,
        };

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO questions (id, task_id, agent, question, question_type, options,
                                    context, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.task_id)
        .bind(&new.agent)
        .bind(&new.question)
        .bind(&new.question_type)
        .bind(&options_json)
        .bind(&new.context)
        .bind(now_iso())
        .execute(&mut *tx)
        .await?;

        let summary: String = new.question.chars().take(100).collect();
        insert_activity(
            &mut *tx,
            &new.task_id,
            ActivityKind::Question,
            new.agent.as_deref(),
            &format!("Question asked: {summary}"),
            None,
        )
        .await?;
        tx.commit().await?;

        let row: QuestionRow = sqlx::query_as("SELECT * FROM questions WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.into())
    }

    /// Records an answer; refuses to overwrite one already present.
    /// Returns the updated question, or `None` if it does not exist or was
    /// already answered.
    pub async fn answer_question(
        &self,
        question_id: &str,
        answer: &str,
        auto_accepted: bool,
    ) -> Result<Option<QuestionView>, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE questions SET answer = ?, answered_at = ?, auto_accepted = ?
             WHERE id = ? AND answer IS NULL",
        )
        .bind(answer)
        .bind(now_iso())
        .bind(auto_accepted)
        .bind(question_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let (task_id,): (String,) =
            sqlx::query_as("SELECT task_id FROM questions WHERE id = ?")
                .bind(question_id)
                .fetch_one(&mut *tx)
                .await?;
        let summary: String = answer.chars().take(100).collect();
        insert_activity(
            &mut *tx,
            &task_id,
            ActivityKind::Answer,
            None,
            &format!("Answer: {summary}"),
            None,
        )
        .await?;
        tx.commit().await?;

        self.get_question(question_id).await
    }

    pub async fn get_question(
        &self,
        question_id: &str,
    ) -> Result<Option<QuestionView>, sqlx::Error> {
        let row: Option<QuestionRow> = sqlx::query_as("SELECT * FROM questions WHERE id = ?")
            .bind(question_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn questions_for_task(
        &self,
        task_id: &str,
        pending_only: bool,
        include_children: bool,
    ) -> Result<Vec<QuestionView>, sqlx::Error> {
        let pending_clause = if pending_only { " AND answer IS NULL" } else { "" };
        let sql = if include_children {
            format!(
                "SELECT * FROM questions
                 WHERE (task_id = ? OR task_id IN (SELECT id FROM tasks WHERE parent_id = ?)){pending_clause}
                 ORDER BY created_at, id"
            )
        } else {
            format!(
                "SELECT * FROM questions WHERE task_id = ?{pending_clause} ORDER BY created_at, id"
            )
        };

        let mut query = sqlx::query_as::<_, QuestionRow>(&sql).bind(task_id);
        if include_children {
            query = query.bind(task_id);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn pending_question_count(&self, task_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM questions WHERE task_id = ? AND answer IS NULL")
                .bind(task_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    pub async fn create_artifact(
        &self,
        task_id: &str,
        artifact_type: &str,
        label: &str,
        file_path: &str,
        mime_type: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<ArtifactRow, sqlx::Error> {
        let id = short_id();
        let metadata_json = metadata
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".to_string());

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO artifacts (id, task_id, artifact_type, label, file_path, mime_type,
                                    metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(artifact_type)
        .bind(label)
        .bind(file_path)
        .bind(mime_type)
        .bind(&metadata_json)
        .bind(now_iso())
        .execute(&mut *tx)
        .await?;

        insert_activity(
            &mut *tx,
            task_id,
            ActivityKind::Artifact,
            None,
            &format!("Artifact added: {label}"),
            None,
        )
        .await?;
        tx.commit().await?;

        sqlx::query_as("SELECT * FROM artifacts WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
    }

    pub async fn artifacts_for_task(
        &self,
        task_id: &str,
        include_children: bool,
    ) -> Result<Vec<ArtifactRow>, sqlx::Error> {
        if include_children {
            sqlx::query_as(
                "SELECT * FROM artifacts
                 WHERE task_id = ? OR task_id IN (SELECT id FROM tasks WHERE parent_id = ?)
                 ORDER BY created_at, id",
            )
            .bind(task_id)
            .bind(task_id)
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query_as("SELECT * FROM artifacts WHERE task_id = ? ORDER BY created_at, id")
                .bind(task_id)
                .fetch_all(self.pool())
                .await
        }
    }

    pub async fn get_artifact(
        &self,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM artifacts WHERE id = ?")
            .bind(artifact_id)
            .fetch_optional(self.pool())
            .await
    }
}

async fn insert_activity<'e, E>(
    executor: E,
    task_id: &str,
    kind: ActivityKind,
    agent: Option<&str>,
    message: &str,
    metadata: Option<serde_json::Value>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let metadata_json = metadata
        .map(|m| m.to_string())
        .unwrap_or_else(|| "{}".to_string());
    let result = sqlx::query(
        "INSERT INTO activity_log (task_id, event_type, agent, message, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(kind)
    .bind(agent)
    .bind(message)
    .bind(metadata_json)
    .bind(now_iso())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}
