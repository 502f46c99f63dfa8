//! Message repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{Message, MessageRole, MessageStatus};

/// Persists message rows for the audit trail.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message row, returning its id.
    pub async fn append(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, role, content, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(role.to_string())
        .bind(content)
        .bind(status.to_string())
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .context("appending message")?;

        Ok(result.last_insert_rowid())
    }

    /// Update the delivery status of a message row.
    pub async fn update_status(&self, id: i64, status: MessageStatus) -> Result<()> {
        sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating message status")?;
        Ok(())
    }

    /// Fetch a message row by id.
    pub async fn get(&self, id: i64) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, role, content, status, created_at
            FROM messages
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching message")?;

        Ok(message)
    }
}
