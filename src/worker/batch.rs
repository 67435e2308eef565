//! Batched refresh over a [`Source`].
//!
//! Targets are refreshed in fixed-size batches with a pause between
//! batches. Items within a batch run concurrently and fail independently,
//! but the run stops after the first batch containing a failure; the
//! remaining targets are left unattempted.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use opentelemetry::KeyValue;

use super::{RunSummary, Worker, WorkerRequest};
use crate::error::Result;
use crate::logger::EventLogger;
use crate::model::{EventId, EventType};
use crate::telemetry::metrics;

/// Where targets come from and how a single one is refreshed.
#[async_trait]
pub trait Source: Send + Sync {
    fn event_type(&self) -> EventType;

    /// Every target the source currently exposes.
    async fn list_targets(&self) -> Result<Vec<String>>;

    /// Fetch and store one target. Must be idempotent.
    async fn refresh(&self, event_id: EventId, target_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    /// Pause between batches, to stay polite towards the source.
    pub batch_delay: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_delay: Duration::from_secs(1),
        }
    }
}

pub struct BatchWorker<S> {
    source: S,
    policy: BatchPolicy,
    logger: EventLogger,
}

impl<S: Source> BatchWorker<S> {
    pub fn new(source: S, policy: BatchPolicy, logger: EventLogger) -> Self {
        Self {
            source,
            policy,
            logger,
        }
    }

    async fn resolve_targets(&self, request: WorkerRequest, context: &str) -> Vec<String> {
        let mut targets = request.target_ids.unwrap_or_default();
        if targets.is_empty() {
            match self.source.list_targets().await {
                Ok(listed) => targets = listed,
                Err(e) => {
                    self.logger
                        .error("failed to list targets", &e, context, Some(request.event_id))
                        .await;
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));
        targets
    }
}

#[async_trait]
impl<S: Source> Worker for BatchWorker<S> {
    fn event_type(&self) -> EventType {
        self.source.event_type()
    }

    async fn run(&self, request: WorkerRequest) -> RunSummary {
        let event_id = request.event_id;
        let event_type = self.source.event_type();
        let context = event_type.as_str();

        self.logger.log("worker started", context, Some(event_id)).await;

        let targets = self.resolve_targets(request, context).await;
        self.logger
            .log(
                &format!("{} targets pending", targets.len()),
                context,
                Some(event_id),
            )
            .await;

        let mut summary = RunSummary {
            total: targets.len(),
            ..RunSummary::default()
        };

        let batch_size = self.policy.batch_size.max(1);
        let batch_count = targets.len().div_ceil(batch_size);

        for (index, batch) in targets.chunks(batch_size).enumerate() {
            let results = join_all(
                batch
                    .iter()
                    .map(|target| self.source.refresh(event_id, target)),
            )
            .await;

            let mut batch_failed = false;
            for (target, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => summary.success_count += 1,
                    Err(e) => {
                        summary.failed_count += 1;
                        batch_failed = true;
                        self.logger
                            .error(
                                &format!("refresh failed for target {target}"),
                                &e,
                                context,
                                Some(event_id),
                            )
                            .await;
                    }
                }
            }

            if batch_failed {
                break;
            }
            if index + 1 < batch_count {
                tokio::time::sleep(self.policy.batch_delay).await;
            }
        }

        for (outcome, count) in [
            ("success", summary.success_count),
            ("failed", summary.failed_count),
            ("skipped", summary.unattempted()),
        ] {
            metrics::worker_targets().add(
                count as u64,
                &[
                    KeyValue::new("event_type", context),
                    KeyValue::new("outcome", outcome),
                ],
            );
        }

        self.logger
            .log(
                &format!(
                    "worker finished: total {}, success {}, failed {}, unattempted {}",
                    summary.total,
                    summary.success_count,
                    summary.failed_count,
                    summary.unattempted()
                ),
                context,
                Some(event_id),
            )
            .await;

        summary
    }
}
