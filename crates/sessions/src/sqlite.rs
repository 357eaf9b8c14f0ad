//! SQLite store.
//!
//! A single `sessions` table holding each state as a JSON document. The
//! escalation flag is mirrored into its own column so operators can query
//! escalated sessions without parsing JSON.

use async_trait::async_trait;
use deskpilot_core::error::SessionError;
use deskpilot_core::session::SessionStore;
use deskpilot_core::state::ConversationState;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is held on a
    /// single connection that never expires.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let ephemeral = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = if ephemeral {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        }
        .connect_with(options)
        .await
        .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id           TEXT PRIMARY KEY NOT NULL,
                state        TEXT NOT NULL,
                is_escalated INTEGER NOT NULL DEFAULT 0,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_escalated ON sessions(is_escalated)")
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::MigrationFailed(format!("escalated index: {e}")))?;

        debug!("SQLite session migrations complete");
        Ok(())
    }

    /// Ids of every escalated session, most recently updated first.
    pub async fn escalated_ids(&self) -> Result<Vec<String>, SessionError> {
        let rows = sqlx::query("SELECT id FROM sessions WHERE is_escalated = 1 ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError> {
        let row = sqlx::query("SELECT state FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("state");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SessionError::Corrupt {
                session_id: session_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<(), SessionError> {
        let raw = serde_json::to_string(state)
            .map_err(|e| SessionError::Storage(format!("Failed to serialize session: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, state, is_escalated, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                is_escalated = excluded.is_escalated,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(raw)
        .bind(state.is_escalated)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?;

        debug!(session_id, "Session saved");
        Ok(())
    }

    async fn count(&self) -> Result<usize, SessionError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteSessionStore {
        SqliteSessionStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_state() {
        let store = store().await;
        let mut state = ConversationState::new("s1");
        store.save("s1", &state).await.unwrap();

        state.is_escalated = true;
        store.save("s1", &state).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("s1").await.unwrap().unwrap().is_escalated);
        assert_eq!(store.escalated_ids().await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let store = store().await;
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.load("nope").await.unwrap().is_new());
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sessions.db").display());
        {
            let store = SqliteSessionStore::new(&url).await.unwrap();
            store.save("a", &ConversationState::new("a")).await.unwrap();
        }
        let reopened = SqliteSessionStore::new(&url).await.unwrap();
        assert!(reopened.get("a").await.unwrap().is_some());
    }
}
