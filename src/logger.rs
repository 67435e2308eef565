//! Event-scoped logger.
//!
//! Every call emits a `tracing` event. Calls that carry an event id also
//! append the message to that event's log in the queue, so an operator can
//! reconstruct per-target failures after the fact. Appending is best
//! effort: a failed append is reported and swallowed.

use std::fmt::Display;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::model::EventId;
use crate::queue::EventQueue;

#[derive(Clone)]
pub struct EventLogger {
    queue: Arc<dyn EventQueue>,
}

impl EventLogger {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self { queue }
    }

    pub async fn log(&self, message: &str, context: &str, event_id: Option<EventId>) {
        match event_id {
            Some(id) => info!(context, event_id = %id, "{message}"),
            None => info!(context, "{message}"),
        }
        if let Some(id) = event_id {
            self.save(id, message).await;
        }
    }

    pub async fn error(
        &self,
        message: &str,
        err: &(dyn Display + Send + Sync),
        context: &str,
        event_id: Option<EventId>,
    ) {
        match event_id {
            Some(id) => error!(context, event_id = %id, error = %err, "{message}"),
            None => error!(context, error = %err, "{message}"),
        }
        if let Some(id) = event_id {
            self.save(id, &format!("{message}: {err}")).await;
        }
    }

    async fn save(&self, id: EventId, message: &str) {
        if let Err(e) = self.queue.append_log(id, message).await {
            warn!(event_id = %id, error = %e, "failed to persist event log");
        }
    }
}
