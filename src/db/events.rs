//! Parsing event operations: create with dedup, acquire under row lock,
//! status tracking.

use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts for a create transaction that keeps losing serialization races.
const MAX_CREATE_ATTEMPTS: u32 = 5;

const EVENT_COLUMNS: &str =
    "id, event_type, event_message, event_status, completed_at, created_at";

fn is_serialization_failure(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "40001")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

impl super::Db {
    /// Queue a new event unless an equivalent one is waiting or processing.
    ///
    /// Check and insert run in one SERIALIZABLE transaction. A transaction
    /// aborted by a concurrent twin is retried; the retry then sees the
    /// committed row and reports `DuplicateEvent`.
    pub async fn create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent> {
        message.validate()?;

        let mut attempt = 1;
        let result = loop {
            match self.try_create_event(event_type, message).await {
                Err(Error::EventCreationFailed(e))
                    if is_serialization_failure(&e) && attempt < MAX_CREATE_ATTEMPTS =>
                {
                    debug!(%event_type, %message, attempt, "create_event serialization conflict, retrying");
                    attempt += 1;
                }
                other => break other,
            }
        };

        let label = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_duplicate() => "duplicate",
            Err(_) => "error",
        };
        metrics::events_created().add(
            1,
            &[
                KeyValue::new("event_type", event_type.as_str()),
                KeyValue::new("result", label),
            ],
        );

        result
    }

    async fn try_create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent> {
        let payload = message.to_json();
        let duplicate = || Error::DuplicateEvent {
            event_type,
            message: message.clone(),
        };

        let mut tx = self.pool().begin().await.map_err(Error::EventCreationFailed)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(Error::EventCreationFailed)?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM parsing_events
             WHERE event_type = $1 AND event_message = $2
             AND event_status IN ('WAIT', 'PROCESSING')
             LIMIT 1",
        )
        .bind(event_type.as_str())
        .bind(&payload)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::EventCreationFailed)?;

        if existing.is_some() {
            tx.rollback().await.map_err(Error::EventCreationFailed)?;
            return Err(duplicate());
        }

        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO parsing_events (id, event_type, event_message, event_status, created_at)
             VALUES ($1, $2, $3, 'WAIT', now())
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(event_type.as_str())
        .bind(&payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                duplicate()
            } else {
                Error::EventCreationFailed(e)
            }
        })?;

        tx.commit().await.map_err(|e| {
            if is_unique_violation(&e) {
                duplicate()
            } else {
                Error::EventCreationFailed(e)
            }
        })?;

        row.try_into_event()
    }

    /// Take one WAIT event and mark it PROCESSING before the lock is released.
    ///
    /// `SKIP LOCKED` lets concurrent pollers pass over a row another
    /// transaction holds, so each row is handed out once. Oldest first.
    pub async fn acquire_event(
        &self,
        event_type: Option<EventType>,
    ) -> Result<Option<ParsingEvent>> {
        let types: Vec<String> = match event_type {
            Some(t) => vec![t.as_str().to_string()],
            None => EventType::ALL.iter().map(|t| t.as_str().to_string()).collect(),
        };

        let mut tx = self.pool().begin().await?;

        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM parsing_events
             WHERE event_status = 'WAIT' AND event_type = ANY($1)
             ORDER BY created_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(&types)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let id = row.id;

        // A row we cannot decode would be re-acquired forever; retire it.
        let event = match row.try_into_event() {
            Ok(event) => event,
            Err(e) => {
                sqlx::query("UPDATE parsing_events SET event_status = 'FAIL', completed_at = NULL WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("INSERT INTO parsing_event_logs (event_id, message) VALUES ($1, $2)")
                    .bind(id)
                    .bind(format!("event retired on acquire: {e}"))
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                warn!(event_id = %id, error = %e, "undecodable event marked FAIL");
                return Err(e);
            }
        };

        sqlx::query(
            "UPDATE parsing_events SET event_status = 'PROCESSING', completed_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::status_changes().add(
            1,
            &[
                KeyValue::new("from", "WAIT"),
                KeyValue::new("to", "PROCESSING"),
            ],
        );

        Ok(Some(ParsingEvent {
            event_status: EventStatus::Processing,
            completed_at: None,
            ..event
        }))
    }

    /// Set an event's status. `completed_at` is stamped for DONE and
    /// cleared for every other status.
    ///
    /// Moving an event back to WAIT or PROCESSING fails with
    /// `DuplicateEvent` while a twin is already outstanding.
    pub async fn set_status(&self, id: EventId, status: EventStatus) -> Result<()> {
        let failed = |source: sqlx::Error| Error::StatusUpdateFailed { id, source };

        let mut tx = self.pool().begin().await.map_err(failed)?;

        let current: Option<(String, String, serde_json::Value)> = sqlx::query_as(
            "SELECT event_status, event_type, event_message
             FROM parsing_events WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(failed)?;

        let Some((current, event_type, payload)) = current else {
            return Err(Error::EventNotFound(id));
        };

        let completed_at: Option<DateTime<Utc>> = (status == EventStatus::Done).then(Utc::now);

        sqlx::query("UPDATE parsing_events SET event_status = $1, completed_at = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(completed_at)
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if !is_unique_violation(&e) {
                    return failed(e);
                }
                // A row that does not decode keeps the raw error.
                match (event_type.parse(), EventMessage::from_json(payload)) {
                    (Ok(event_type), Ok(message)) => Error::DuplicateEvent {
                        event_type,
                        message,
                    },
                    _ => failed(e),
                }
            })?;

        tx.commit().await.map_err(failed)?;

        let from: EventStatus = current.parse()?;
        if !from.can_transition_to(status) {
            warn!(event_id = %id, %from, to = %status, "status override outside the normal lifecycle");
        }
        metrics::status_changes().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", status.as_str()),
            ],
        );

        Ok(())
    }

    /// Get an event by ID.
    pub async fn get_event(&self, id: EventId) -> Result<ParsingEvent> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM parsing_events WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or(Error::EventNotFound(id))?.try_into_event()
    }

    /// List events, newest first. Rows that fail to decode are skipped.
    pub async fn list_events(
        &self,
        status: Option<EventStatus>,
        event_type: Option<EventType>,
        limit: i64,
    ) -> Result<Vec<ParsingEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM parsing_events
             WHERE ($1::text IS NULL OR event_status = $1)
             AND ($2::text IS NULL OR event_type = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        ))
        .bind(status.map(EventStatus::as_str))
        .bind(event_type.map(EventType::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        // One bad row should not hide the rest from an operator.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.try_into_event()
                    .inspect_err(|e| warn!(event_id = %id, error = %e, "skipping undecodable event"))
                    .ok()
            })
            .collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    event_message: serde_json::Value,
    event_status: String,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn try_into_event(self) -> Result<ParsingEvent> {
        Ok(ParsingEvent {
            id: EventId(self.id),
            event_type: self.event_type.parse()?,
            event_message: EventMessage::from_json(self.event_message)?,
            event_status: self.event_status.parse()?,
            completed_at: self.completed_at,
            created_at: self.created_at,
        })
    }
}
