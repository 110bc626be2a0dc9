//! SQLite conversation store.
//!
//! Two tables:
//! - `sessions`: one row per conversation, `updated_at` touched on every append
//! - `messages`: ordered by an autoincrement rowid, attachments and tool
//!   invocations stored as JSON text
//!
//! Inline attachment payloads are never written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::error::PersistenceError;
use concierge_core::{ConversationSession, Message, PersistenceGateway, Role, SessionId};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage_err(context: &str) -> impl FnOnce(sqlx::Error) -> PersistenceError + '_ {
    move |e| PersistenceError::Storage(format!("{context}: {e}"))
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_role(s: &str) -> Result<Role, PersistenceError> {
    match s {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(PersistenceError::Storage(format!("unknown role in store: {other}"))),
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Storage(format!("bad timestamp {s}: {e}")))
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(storage_err("Failed to open SQLite"))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY NOT NULL,
                owner       TEXT NOT NULL,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT UNIQUE NOT NULL,
                session_id       TEXT NOT NULL REFERENCES sessions(id),
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                attachments      TEXT NOT NULL DEFAULT '[]',
                tool_invocations TEXT NOT NULL DEFAULT '[]',
                created_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, iid)")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner, updated_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::MigrationFailed(format!("sessions index: {e}")))?;

        debug!("SQLite store migrations complete");
        Ok(())
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &SessionId,
        message: &Message,
    ) -> Result<(), PersistenceError> {
        let stored = message.for_storage();
        let attachments = serde_json::to_string(&stored.attachments)
            .map_err(|e| PersistenceError::Storage(format!("encode attachments: {e}")))?;
        let invocations = serde_json::to_string(&stored.tool_invocations)
            .map_err(|e| PersistenceError::Storage(format!("encode tool invocations: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, attachments, tool_invocations, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&stored.id)
        .bind(session_id.as_str())
        .bind(role_str(stored.role))
        .bind(&stored.content)
        .bind(attachments)
        .bind(invocations)
        .bind(stored.timestamp.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(storage_err("insert message"))?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn create_session(&self, owner: &str, title: &str) -> Result<SessionId, PersistenceError> {
        let session = ConversationSession::new(owner, title);
        sqlx::query("INSERT INTO sessions (id, owner, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)")
            .bind(session.id.as_str())
            .bind(&session.owner)
            .bind(&session.title)
            .bind(session.created_at.to_rfc3339())
            .bind(session.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err("create session"))?;
        debug!(session_id = %session.id, owner, "Session created");
        Ok(session.id)
    }

    async fn append_message_pair(
        &self,
        session_id: &SessionId,
        user: &Message,
        assistant: &Message,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(storage_err("begin transaction"))?;

        let touched = sqlx::query("UPDATE sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_err("touch session"))?;
        if touched.rows_affected() == 0 {
            return Err(PersistenceError::SessionNotFound(session_id.to_string()));
        }

        Self::insert_message(&mut tx, session_id, user).await?;
        Self::insert_message(&mut tx, session_id, assistant).await?;

        tx.commit().await.map_err(storage_err("commit"))?;
        debug!(session_id = %session_id, "Message pair persisted");
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<ConversationSession>, PersistenceError> {
        let Some(row) = sqlx::query("SELECT id, owner, title, created_at, updated_at FROM sessions WHERE id = ?1")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("load session"))?
        else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT id, role, content, attachments, tool_invocations, created_at
            FROM messages WHERE session_id = ?1 ORDER BY iid ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("load messages"))?;

        let mut messages = Vec::with_capacity(rows.len());
        for r in rows {
            let attachments: String = r.get("attachments");
            let invocations: String = r.get("tool_invocations");
            let role: String = r.get("role");
            let created_at: String = r.get("created_at");
            messages.push(Message {
                id: r.get("id"),
                role: parse_role(&role)?,
                content: r.get("content"),
                attachments: serde_json::from_str(&attachments)
                    .map_err(|e| PersistenceError::Storage(format!("decode attachments: {e}")))?,
                tool_invocations: serde_json::from_str(&invocations)
                    .map_err(|e| PersistenceError::Storage(format!("decode tool invocations: {e}")))?,
                timestamp: parse_time(&created_at)?,
            });
        }

        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        Ok(Some(ConversationSession {
            id: SessionId::from(row.get::<String, _>("id")),
            owner: row.get("owner"),
            title: row.get("title"),
            messages,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::{Attachment, InvocationStatus, ToolInvocation};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_session_then_load_empty() {
        let store = test_store().await;
        let id = store.create_session("user-1", "Valuation March").await.unwrap();
        let session = store.load_session(&id).await.unwrap().unwrap();
        assert_eq!(session.title, "Valuation March");
        assert_eq!(session.owner, "user-1");
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn append_pair_round_trips_invocations_and_strips_payloads() {
        let store = test_store().await;
        let id = store.create_session("user-1", "t").await.unwrap();
        let before = store.load_session(&id).await.unwrap().unwrap().updated_at;

        let user = Message::user("quote this")
            .with_attachments(vec![Attachment::new("rfq.pdf", "application/pdf", Some("JVBERi0=".into()))]);
        let assistant = Message::assistant("Created quotation Q-12").with_tool_invocations(vec![ToolInvocation {
            id: "toolu_1".into(),
            name: "create_quotation".into(),
            input: serde_json::json!({"client": "ACME"}),
            result: serde_json::json!({"id": "Q-12"}),
            status: InvocationStatus::Completed,
        }]);
        store.append_message_pair(&id, &user, &assistant).await.unwrap();

        let session = store.load_session(&id).await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].attachments[0].name, "rfq.pdf");
        assert!(!session.messages[0].attachments[0].has_payload());
        assert_eq!(session.messages[1].tool_invocations[0].result["id"], "Q-12");
        assert!(session.updated_at >= before);
    }

    #[tokio::test]
    async fn append_to_missing_session_writes_nothing() {
        let store = test_store().await;
        let missing = SessionId::from("missing");
        let err = store
            .append_message_pair(&missing, &Message::user("a"), &Message::assistant("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::SessionNotFound(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unknown_session_loads_none() {
        let store = test_store().await;
        assert!(store.load_session(&SessionId::from("nope")).await.unwrap().is_none());
    }
}
