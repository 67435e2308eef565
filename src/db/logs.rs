//! Event log operations.

use crate::error::{Error, Result};
use crate::model::log::LogEntry;
use crate::model::EventId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl super::Db {
    /// Append one line to an event's diagnostic trail.
    ///
    /// The event row is not checked; logs may outlive purged events.
    pub async fn append_log(&self, event_id: EventId, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO parsing_event_logs (event_id, message) VALUES ($1, $2)")
            .bind(event_id.0)
            .bind(message)
            .execute(self.pool())
            .await
            .map_err(|source| Error::LogCreationFailed {
                id: event_id,
                source,
            })?;
        Ok(())
    }

    /// All log lines for an event, oldest first.
    pub async fn list_logs(&self, event_id: EventId) -> Result<Vec<LogEntry>> {
        let rows: Vec<(i64, Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, event_id, message, created_at FROM parsing_event_logs
             WHERE event_id = $1
             ORDER BY created_at, id",
        )
        .bind(event_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, event_id, message, created_at)| LogEntry {
                id,
                event_id: EventId(event_id),
                message,
                created_at,
            })
            .collect())
    }
}
