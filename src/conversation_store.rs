//! Persisted conversations and their message log.
//!
//! Every chat turn is appended to the `messages` table keyed by the
//! conversation guid; the full history is read back in insertion order
//! before each model call. Conversation rows carry optional title and
//! description metadata and are created lazily on first use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use advisory_core::models::{ConversationTurn, Role};

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    /// ISO 8601.
    pub created_at: String,
}

impl StoredMessage {
    pub fn to_turn(&self) -> ConversationTurn {
        ConversationTurn::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub guid: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Append-only conversation log.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Create the conversation row if it does not exist.
    async fn ensure_conversation(&self, guid: &str) -> Result<()>;

    async fn conversation(&self, guid: &str) -> Result<Option<ConversationRecord>>;

    /// Create or update title and description. `None` leaves a field as is.
    async fn save_conversation(
        &self,
        guid: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<ConversationRecord>;

    async fn append(&self, guid: &str, role: Role, content: &str) -> Result<()>;

    /// Messages in insertion order.
    async fn messages(&self, guid: &str) -> Result<Vec<StoredMessage>>;
}

pub struct SqliteConversationLog {
    pool: SqlitePool,
}

impl SqliteConversationLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[async_trait]
impl ConversationLog for SqliteConversationLog {
    async fn ensure_conversation(&self, guid: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO conversations (guid, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(guid)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create conversation {}", guid))?;
        Ok(())
    }

    async fn conversation(&self, guid: &str) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(
            "SELECT guid, title, description, created_at, updated_at FROM conversations WHERE guid = ?",
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ConversationRecord {
            guid: row.get("guid"),
            title: row.get("title"),
            description: row.get("description"),
            created_at: format_ts(row.get("created_at")),
            updated_at: format_ts(row.get("updated_at")),
        }))
    }

    async fn save_conversation(
        &self,
        guid: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<ConversationRecord> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO conversations (guid, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guid) DO UPDATE SET
                title = COALESCE(excluded.title, conversations.title),
                description = COALESCE(excluded.description, conversations.description),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(guid)
        .bind(title)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save conversation {}", guid))?;

        self.conversation(guid)
            .await?
            .with_context(|| format!("conversation {} vanished after save", guid))
    }

    async fn append(&self, guid: &str, role: Role, content: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO conversations (guid, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(guid)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO messages (conversation_guid, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(guid)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE guid = ?")
            .bind(now)
            .bind(guid)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to append {} message to {}", role, guid))?;
        Ok(())
    }

    async fn messages(&self, guid: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM messages WHERE conversation_guid = ? ORDER BY id ASC",
        )
        .bind(guid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<StoredMessage> {
                let role: String = row.get("role");
                Ok(StoredMessage {
                    role: role.parse()?,
                    content: row.get("content"),
                    created_at: format_ts(row.get("created_at")),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_log() -> (SqliteConversationLog, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config: crate::config::Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n[server]\nbind = \"127.0.0.1:0\"\n",
            tmp.path().join("log.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::create_tables(&pool).await.unwrap();
        (SqliteConversationLog::new(pool), tmp)
    }

    const GUID: &str = "6f1c2d3e-4a5b-4c6d-8e9f-0a1b2c3d4e5f";

    #[tokio::test]
    async fn test_append_preserves_order() {
        let (log, _tmp) = open_log().await;
        log.append(GUID, Role::User, "Hello").await.unwrap();
        log.append(GUID, Role::Assistant, "Hi! What does your business do?")
            .await
            .unwrap();
        log.append(GUID, Role::User, "We grow wheat").await.unwrap();

        let messages = log.messages(GUID).await.unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[2].to_turn(), ConversationTurn::user("We grow wheat"));
        assert!(log.conversation(GUID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let (log, _tmp) = open_log().await;
        assert!(log.conversation(GUID).await.unwrap().is_none());
        assert!(log.messages(GUID).await.unwrap().is_empty());

        log.ensure_conversation(GUID).await.unwrap();
        log.ensure_conversation(GUID).await.unwrap();
        let record = log.conversation(GUID).await.unwrap().unwrap();
        assert_eq!(record.guid, GUID);
        assert_eq!(record.title, None);
    }

    #[tokio::test]
    async fn test_save_keeps_fields_not_supplied() {
        let (log, _tmp) = open_log().await;
        log.save_conversation(GUID, Some("Farm plan"), Some("Irrigation ideas"))
            .await
            .unwrap();
        let record = log
            .save_conversation(GUID, Some("Farm AI plan"), None)
            .await
            .unwrap();
        assert_eq!(record.title.as_deref(), Some("Farm AI plan"));
        assert_eq!(record.description.as_deref(), Some("Irrigation ideas"));
    }
}
