//! Scheduler: originates refresh requests and drives dispatch.
//!
//! Two independent loops run inside one process:
//! - the producer fires on a cron schedule in a fixed timezone and queues a
//!   full refresh of the default source;
//! - the poller ticks at a short fixed interval, acquires one event and
//!   dispatches it to its worker.
//!
//! Each poll tick runs as its own task. A single-flight flag makes a tick
//! that overlaps a running cycle skip instead of piling up. The flag only
//! covers this process; exclusion between instances comes from the row
//! lock in `acquire_event`, not from here.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Offset, Utc};
use cron::Schedule;
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{EventMessage, EventStatus, EventType, ParsingEvent};
use crate::queue::EventQueue;
use crate::refresh::{RefreshOutcome, request_refresh};
use crate::telemetry::dispatch::{record_status, start_dispatch_span};
use crate::telemetry::metrics;
use crate::worker::RunSummary;

/// Configuration for the scheduler loops.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cron expression with a seconds field, e.g. `0 0 4 * * *`.
    pub producer_schedule: String,
    /// Timezone the producer schedule is evaluated in.
    pub timezone: FixedOffset,
    /// Source the producer queues a full refresh for.
    pub default_source: EventType,
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            producer_schedule: "0 0 4 * * *".to_string(),
            timezone: FixedOffset::east_opt(9 * 3600).unwrap_or(Utc.fix()),
            default_source: EventType::DinnerQueen,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle held the single-flight flag.
    Skipped,
    /// No WAIT event was available.
    Idle,
    Processed {
        event: Box<ParsingEvent>,
        summary: RunSummary,
        status: EventStatus,
    },
}

/// Resolves once shutdown has been signalled (or the sender is gone).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Holds the single-flight flag; clears it on drop, error paths included.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    queue: Arc<dyn EventQueue>,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    schedule: Schedule,
    busy: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            schedule: self.schedule.clone(),
            busy: Arc::clone(&self.busy),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(&config.producer_schedule).map_err(|e| {
            Error::Config(format!(
                "invalid producer schedule '{}': {e}",
                config.producer_schedule
            ))
        })?;
        if config.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".to_string()));
        }
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            queue,
            dispatcher,
            config,
            schedule,
            busy: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Signal both loops to stop. In-flight dispatches run to completion.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run producer and poller until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(
            schedule = %self.config.producer_schedule,
            timezone = %self.config.timezone,
            default_source = %self.config.default_source,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "scheduler started"
        );

        let producer = tokio::spawn({
            let scheduler = self.clone();
            async move { scheduler.run_producer().await }
        });
        let poller = tokio::spawn({
            let scheduler = self.clone();
            async move { scheduler.run_poller().await }
        });

        let (producer, poller) = tokio::join!(producer, poller);
        producer.map_err(|e| Error::Other(format!("producer task failed: {e}")))?;
        poller.map_err(|e| Error::Other(format!("poller task failed: {e}")))?;

        info!("scheduler stopped");
        Ok(())
    }

    /// Queue a full refresh of the default source.
    ///
    /// An outstanding equivalent event is the expected case when the
    /// previous cycle has not finished, and is not an error.
    pub async fn produce_once(&self) -> Result<RefreshOutcome> {
        request_refresh(
            self.queue.as_ref(),
            self.config.default_source,
            EventMessage::All,
        )
        .await
    }

    /// One poll cycle: acquire an event, dispatch it, record the outcome.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            metrics::poll_ticks_skipped().add(1, &[]);
            debug!("poll cycle still running, skipping tick");
            return Ok(PollOutcome::Skipped);
        };

        let Some(event) = self.queue.acquire_event(None).await? else {
            return Ok(PollOutcome::Idle);
        };

        let span = start_dispatch_span(&event);
        async {
            let started = Instant::now();
            info!("event acquired");

            let summary = self.dispatcher.dispatch(&event).await;
            let status = if summary.is_success() {
                EventStatus::Done
            } else {
                EventStatus::Fail
            };

            self.queue.set_status(event.id, status).await?;
            record_status(&span, EventStatus::Processing, status);

            metrics::dispatch_duration_ms().record(
                started.elapsed().as_millis() as f64,
                &[
                    KeyValue::new("event_type", event.event_type.as_str()),
                    KeyValue::new("status", status.as_str()),
                ],
            );
            info!(
                total = summary.total,
                success = summary.success_count,
                failed = summary.failed_count,
                %status,
                "event finished"
            );

            Ok::<_, Error>(PollOutcome::Processed {
                event: Box::new(event),
                summary,
                status,
            })
        }
        .instrument(span.clone())
        .await
    }

    async fn run_producer(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let Some(next) = self.schedule.upcoming(self.config.timezone).next() else {
                warn!("producer schedule has no upcoming fire time, producer stopping");
                return;
            };
            let wait = (next.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            debug!(next = %next, "producer sleeping until next run");

            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.produce_once().await {
                Ok(RefreshOutcome::Queued(event)) => {
                    info!(event_id = %event.id, "scheduled refresh queued");
                }
                Ok(RefreshOutcome::AlreadyPending) => {
                    info!("scheduled refresh skipped, previous one still outstanding");
                }
                Err(e) => error!(error = %e, "failed to queue scheduled refresh"),
            }
        }
    }

    async fn run_poller(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = interval.tick() => {
                    while ticks.try_join_next().is_some() {}
                    let scheduler = self.clone();
                    ticks.spawn(async move {
                        if let Err(e) = scheduler.poll_once().await {
                            error!(error = %e, "poll cycle failed");
                        }
                    });
                }
            }
        }

        // Let an in-flight dispatch record its status before returning.
        while ticks.join_next().await.is_some() {}
    }
}
