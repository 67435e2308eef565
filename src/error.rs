//! Error types for refreshq.

use thiserror::Error;

use crate::model::{EventId, EventMessage, EventType};

#[derive(Debug, Error)]
pub enum Error {
    /// An equivalent event is already waiting or processing.
    #[error("an equivalent event is already queued: {event_type} {message}")]
    DuplicateEvent {
        event_type: EventType,
        message: EventMessage,
    },

    #[error("event creation failed: {0}")]
    EventCreationFailed(#[source] sqlx::Error),

    #[error("parsing event not found: {0}")]
    EventNotFound(EventId),

    #[error("status update failed for event {id}: {source}")]
    StatusUpdateFailed {
        id: EventId,
        #[source]
        source: sqlx::Error,
    },

    #[error("log creation failed for event {id}: {source}")]
    LogCreationFailed {
        id: EventId,
        #[source]
        source: sqlx::Error,
    },

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("invalid event message: {0}")]
    InvalidMessage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the benign "already queued" signal producers swallow.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateEvent { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
