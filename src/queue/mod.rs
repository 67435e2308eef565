//! The update-request queue contract.
//!
//! [`EventQueue`] is the only writer of event status. The Postgres store
//! ([`Db`]) is the production implementation; [`MemoryQueue`] keeps the
//! same guarantees inside one process.

pub mod memory;

pub use memory::MemoryQueue;

use async_trait::async_trait;

use crate::db::Db;
use crate::error::Result;
use crate::model::log::LogEntry;
use crate::model::{EventId, EventMessage, EventStatus, EventType, ParsingEvent};

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Insert a WAIT event, or fail with `DuplicateEvent` if the same
    /// `(event_type, message)` is already WAIT or PROCESSING.
    async fn create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent>;

    /// Hand out at most one WAIT event, already moved to PROCESSING.
    async fn acquire_event(&self, event_type: Option<EventType>) -> Result<Option<ParsingEvent>>;

    async fn set_status(&self, id: EventId, status: EventStatus) -> Result<()>;

    async fn append_log(&self, id: EventId, message: &str) -> Result<()>;

    async fn get_event(&self, id: EventId) -> Result<ParsingEvent>;

    async fn list_logs(&self, id: EventId) -> Result<Vec<LogEntry>>;
}

#[async_trait]
impl EventQueue for Db {
    async fn create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent> {
        Db::create_event(self, event_type, message).await
    }

    async fn acquire_event(&self, event_type: Option<EventType>) -> Result<Option<ParsingEvent>> {
        Db::acquire_event(self, event_type).await
    }

    async fn set_status(&self, id: EventId, status: EventStatus) -> Result<()> {
        Db::set_status(self, id, status).await
    }

    async fn append_log(&self, id: EventId, message: &str) -> Result<()> {
        Db::append_log(self, id, message).await
    }

    async fn get_event(&self, id: EventId) -> Result<ParsingEvent> {
        Db::get_event(self, id).await
    }

    async fn list_logs(&self, id: EventId) -> Result<Vec<LogEntry>> {
        Db::list_logs(self, id).await
    }
}
