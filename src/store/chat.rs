//! Chat session and message queries.

use super::types::{ChatMessageRow, ChatSessionRow};
use super::{now_iso, short_id, Store};

impl Store {
    pub async fn create_chat_session(
        &self,
        title: &str,
        model: Option<&str>,
    ) -> Result<ChatSessionRow, sqlx::Error> {
        let id = short_id();
        sqlx::query(
            "INSERT INTO chat_sessions (id, title, model, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(model)
        .bind(now_iso())
        .execute(self.pool())
        .await?;

        sqlx::query_as("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
    }

    pub async fn get_chat_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ChatSessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(self.pool())
            .await
    }

    pub async fn list_chat_sessions(&self) -> Result<Vec<ChatSessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM chat_sessions ORDER BY created_at DESC, id")
            .fetch_all(self.pool())
            .await
    }

    pub async fn rename_chat_session(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<Option<ChatSessionRow>, sqlx::Error> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(session_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_chat_session(session_id).await
    }

    pub async fn delete_chat_session(&self, session_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_resume_token(
        &self,
        session_id: &str,
        token: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chat_sessions SET resume_token = ? WHERE id = ?")
            .bind(token)
            .bind(session_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn append_chat_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        cost_usd: Option<f64>,
        duration_ms: Option<i64>,
    ) -> Result<ChatMessageRow, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, cost_usd, duration_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(cost_usd)
        .bind(duration_ms)
        .bind(now_iso())
        .execute(self.pool())
        .await?;

        sqlx::query_as("SELECT * FROM chat_messages WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(self.pool())
            .await
    }

    pub async fn chat_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatMessageRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM chat_messages WHERE session_id = ? ORDER BY id")
            .bind(session_id)
            .fetch_all(self.pool())
            .await
    }
}
