//! In-process event queue.
//!
//! Every operation takes one async mutex, which gives the same
//! exactly-once create and acquire guarantees the Postgres store gets from
//! SERIALIZABLE transactions and row locks, but only within this process.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::EventQueue;
use crate::error::{Error, Result};
use crate::model::log::LogEntry;
use crate::model::{EventId, EventMessage, EventStatus, EventType, ParsingEvent};

#[derive(Default)]
struct Tables {
    events: Vec<ParsingEvent>,
    logs: Vec<LogEntry>,
}

/// Event queue held in memory. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryQueue {
    tables: Mutex<Tables>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event, in insertion order.
    pub async fn events(&self) -> Vec<ParsingEvent> {
        self.tables.lock().await.events.clone()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent> {
        message.validate()?;
        let mut tables = self.tables.lock().await;

        let duplicate = tables.events.iter().any(|e| {
            e.event_type == event_type
                && e.event_message == *message
                && !e.event_status.is_terminal()
        });
        if duplicate {
            return Err(Error::DuplicateEvent {
                event_type,
                message: message.clone(),
            });
        }

        let event = ParsingEvent {
            id: EventId::new(),
            event_type,
            event_message: message.clone(),
            event_status: EventStatus::Wait,
            completed_at: None,
            created_at: Utc::now(),
        };
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn acquire_event(&self, event_type: Option<EventType>) -> Result<Option<ParsingEvent>> {
        let mut tables = self.tables.lock().await;

        let next = tables.events.iter_mut().find(|e| {
            e.event_status == EventStatus::Wait && event_type.is_none_or(|t| t == e.event_type)
        });

        Ok(next.map(|event| {
            event.event_status = EventStatus::Processing;
            event.completed_at = None;
            event.clone()
        }))
    }

    async fn set_status(&self, id: EventId, status: EventStatus) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let index = tables
            .events
            .iter()
            .position(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))?;

        // Reopening must not create a second outstanding twin.
        if !status.is_terminal() {
            let current = &tables.events[index];
            let twin = tables.events.iter().any(|e| {
                e.id != id
                    && e.event_type == current.event_type
                    && e.event_message == current.event_message
                    && !e.event_status.is_terminal()
            });
            if twin {
                return Err(Error::DuplicateEvent {
                    event_type: current.event_type,
                    message: current.event_message.clone(),
                });
            }
        }

        let event = &mut tables.events[index];
        event.event_status = status;
        event.completed_at = (status == EventStatus::Done).then(Utc::now);
        Ok(())
    }

    async fn append_log(&self, id: EventId, message: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let entry = LogEntry {
            id: tables.logs.len() as i64 + 1,
            event_id: id,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        tables.logs.push(entry);
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<ParsingEvent> {
        let tables = self.tables.lock().await;
        tables
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(Error::EventNotFound(id))
    }

    async fn list_logs(&self, id: EventId) -> Result<Vec<LogEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.event_id == id)
            .cloned()
            .collect())
    }
}
