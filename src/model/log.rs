//! Event log entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;

/// One line of an event's diagnostic trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub event_id: EventId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
