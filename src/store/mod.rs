//! SQLite-backed persistent store.
//!
//! Opened in WAL mode so request handlers can read concurrently while a
//! single writer commits. Every write is one short transaction; nothing in
//! here awaits subprocess I/O.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;

pub mod chat;
pub mod tasks;
pub mod types;

pub use types::*;

/// Attempts made to open the database before giving up.
const CONNECT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path`, run migrations,
    /// and return a pooled handle. Connection failures are retried with
    /// bounded backoff before surfacing.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let mut attempt = 0u32;
        let pool = loop {
            attempt += 1;
            match SqlitePool::connect_with(options.clone()).await {
                Ok(pool) => break pool,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let backoff = Duration::from_millis(200 * u64::from(attempt));
                    tracing::warn!(
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "database open failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Current UTC time in the textual format all tables use.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Short random identifier, matching the dashboard's 8-char id convention.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}
