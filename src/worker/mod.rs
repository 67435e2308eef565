//! Source workers.
//!
//! A worker refreshes the targets of one external source. The queue only
//! guarantees exactly-once at the event level, so workers must be safe to
//! re-run against the same target.

pub mod batch;
pub mod command;

pub use batch::{BatchPolicy, BatchWorker, Source};
pub use command::{CommandSource, WorkerConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{EventId, EventType};

/// What a worker is asked to do for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub event_id: EventId,
    /// `None` (or empty) means refresh everything the source exposes.
    pub target_ids: Option<Vec<String>>,
}

/// Aggregate outcome of one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
}

impl RunSummary {
    /// Targets never attempted because an earlier batch failed.
    pub fn unattempted(&self) -> usize {
        self.total
            .saturating_sub(self.success_count)
            .saturating_sub(self.failed_count)
    }

    /// An event succeeds only if every target did.
    pub fn is_success(&self) -> bool {
        self.total == self.success_count
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// The event type this worker handles.
    fn event_type(&self) -> EventType;

    /// Refresh the requested targets. Per-target failures are folded into
    /// the summary, never returned.
    async fn run(&self, request: WorkerRequest) -> RunSummary;
}
