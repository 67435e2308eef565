use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use refreshq::dispatcher::Dispatcher;
use refreshq::error::{Error, Result};
use refreshq::logger::EventLogger;
use refreshq::model::log::LogEntry;
use refreshq::model::{EventId, EventMessage, EventStatus, EventType, ParsingEvent};
use refreshq::queue::{EventQueue, MemoryQueue};
use refreshq::refresh::{CampaignRef, RefreshOutcome, request_campaign_refresh};
use refreshq::scheduler::{PollOutcome, Scheduler, SchedulerConfig};
use refreshq::worker::{RunSummary, Worker, WorkerRequest};
use tokio::sync::Notify;

/// Reports a fixed summary and checks the event is PROCESSING while it runs.
struct FixedWorker {
    event_type: EventType,
    summary: RunSummary,
    queue: Arc<dyn EventQueue>,
    runs: AtomicUsize,
    saw_processing: AtomicUsize,
}

#[async_trait]
impl Worker for FixedWorker {
    fn event_type(&self) -> EventType {
        self.event_type
    }

    async fn run(&self, request: WorkerRequest) -> RunSummary {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let event = self.queue.get_event(request.event_id).await.unwrap();
        if event.event_status == EventStatus::Processing {
            self.saw_processing.fetch_add(1, Ordering::SeqCst);
        }
        self.summary
    }
}

/// Blocks until released, so a poll cycle can be held open.
struct GatedWorker {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Worker for GatedWorker {
    fn event_type(&self) -> EventType {
        EventType::DinnerQueen
    }

    async fn run(&self, _request: WorkerRequest) -> RunSummary {
        self.started.notify_one();
        self.release.notified().await;
        RunSummary::default()
    }
}

/// Memory queue whose next acquire or status write can be made to fail once.
#[derive(Default)]
struct FlakyQueue {
    inner: MemoryQueue,
    fail_acquire: AtomicBool,
    fail_set_status: AtomicBool,
}

fn outage() -> Error {
    Error::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl EventQueue for FlakyQueue {
    async fn create_event(
        &self,
        event_type: EventType,
        message: &EventMessage,
    ) -> Result<ParsingEvent> {
        self.inner.create_event(event_type, message).await
    }

    async fn acquire_event(&self, event_type: Option<EventType>) -> Result<Option<ParsingEvent>> {
        if self.fail_acquire.swap(false, Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.acquire_event(event_type).await
    }

    async fn set_status(&self, id: EventId, status: EventStatus) -> Result<()> {
        if self.fail_set_status.swap(false, Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.set_status(id, status).await
    }

    async fn append_log(&self, id: EventId, message: &str) -> Result<()> {
        self.inner.append_log(id, message).await
    }

    async fn get_event(&self, id: EventId) -> Result<ParsingEvent> {
        self.inner.get_event(id).await
    }

    async fn list_logs(&self, id: EventId) -> Result<Vec<LogEntry>> {
        self.inner.list_logs(id).await
    }
}

fn summary(total: usize, success_count: usize, failed_count: usize) -> RunSummary {
    RunSummary {
        total,
        success_count,
        failed_count,
    }
}

fn scheduler(queue: &Arc<MemoryQueue>, workers: Vec<Arc<dyn Worker>>) -> Scheduler {
    scheduler_with(queue, workers, SchedulerConfig::default())
}

fn scheduler_with(
    queue: &Arc<MemoryQueue>,
    workers: Vec<Arc<dyn Worker>>,
    config: SchedulerConfig,
) -> Scheduler {
    let queue: Arc<dyn EventQueue> = queue.clone();
    let mut dispatcher = Dispatcher::new(EventLogger::new(Arc::clone(&queue)));
    for worker in workers {
        dispatcher.register(worker).unwrap();
    }
    Scheduler::new(queue, Arc::new(dispatcher), config).unwrap()
}

fn fixed(queue: &Arc<MemoryQueue>, summary: RunSummary) -> Arc<FixedWorker> {
    Arc::new(FixedWorker {
        event_type: EventType::DinnerQueen,
        summary,
        queue: queue.clone(),
        runs: AtomicUsize::new(0),
        saw_processing: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn full_success_marks_done() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = fixed(&queue, summary(3, 3, 0));
    let scheduler = scheduler(&queue, vec![worker.clone()]);

    let event = queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();

    let outcome = scheduler.poll_once().await.unwrap();
    let PollOutcome::Processed {
        event: processed,
        summary: got,
        status,
    } = outcome
    else {
        panic!("expected Processed, got {outcome:?}");
    };
    assert_eq!(processed.id, event.id);
    assert_eq!(got, summary(3, 3, 0));
    assert_eq!(status, EventStatus::Done);
    assert_eq!(worker.saw_processing.load(Ordering::SeqCst), 1);

    let stored = queue.get_event(event.id).await.unwrap();
    assert_eq!(stored.event_status, EventStatus::Done);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn any_failure_marks_fail() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![fixed(&queue, summary(3, 2, 1))]);

    let event = queue
        .create_event(EventType::DinnerQueen, &EventMessage::update("5"))
        .await
        .unwrap();
    scheduler.poll_once().await.unwrap();

    let stored = queue.get_event(event.id).await.unwrap();
    assert_eq!(stored.event_status, EventStatus::Fail);
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
async fn unattempted_targets_mark_fail() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![fixed(&queue, summary(5, 3, 0))]);

    let event = queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();
    scheduler.poll_once().await.unwrap();

    assert_eq!(
        queue.get_event(event.id).await.unwrap().event_status,
        EventStatus::Fail
    );
}

#[tokio::test]
async fn empty_run_marks_done() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![fixed(&queue, RunSummary::default())]);

    let event = queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();
    scheduler.poll_once().await.unwrap();

    assert_eq!(
        queue.get_event(event.id).await.unwrap().event_status,
        EventStatus::Done
    );
}

#[tokio::test]
async fn unregistered_type_marks_fail() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = fixed(&queue, summary(1, 1, 0));
    let scheduler = scheduler(&queue, vec![worker.clone()]);

    let event = queue
        .create_event(EventType::Seoulouba, &EventMessage::All)
        .await
        .unwrap();
    let outcome = scheduler.poll_once().await.unwrap();

    assert!(matches!(
        outcome,
        PollOutcome::Processed { status: EventStatus::Fail, summary: s, .. } if s == summary(1, 0, 0)
    ));
    assert_eq!(worker.runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        queue.get_event(event.id).await.unwrap().event_status,
        EventStatus::Fail
    );
}

#[tokio::test]
async fn idle_when_nothing_waits() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![]);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let queue = Arc::new(MemoryQueue::new());
    let gated = Arc::new(GatedWorker {
        started: Notify::new(),
        release: Notify::new(),
    });
    let scheduler = scheduler(&queue, vec![gated.clone()]);

    queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();
    queue
        .create_event(EventType::DinnerQueen, &EventMessage::update("1"))
        .await
        .unwrap();

    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.poll_once().await }
    });
    gated.started.notified().await;

    // The second event is still WAIT, but the cycle is busy.
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Skipped);

    gated.release.notify_one();
    let first = running.await.unwrap().unwrap();
    assert!(matches!(first, PollOutcome::Processed { .. }));

    // Flag released: the next tick picks up the second event.
    gated.release.notify_one();
    assert!(matches!(
        scheduler.poll_once().await.unwrap(),
        PollOutcome::Processed { .. }
    ));
}

#[tokio::test]
async fn busy_flag_released_between_cycles() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![fixed(&queue, summary(1, 1, 0))]);

    // Nothing to do twice in a row: the flag must not stick.
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn busy_flag_released_after_a_failed_cycle() {
    let queue = Arc::new(FlakyQueue::default());
    let dyn_queue: Arc<dyn EventQueue> = queue.clone();
    let mut dispatcher = Dispatcher::new(EventLogger::new(Arc::clone(&dyn_queue)));
    dispatcher
        .register(Arc::new(FixedWorker {
            event_type: EventType::DinnerQueen,
            summary: summary(1, 1, 0),
            queue: Arc::clone(&dyn_queue),
            runs: AtomicUsize::new(0),
            saw_processing: AtomicUsize::new(0),
        }))
        .unwrap();
    let scheduler =
        Scheduler::new(dyn_queue, Arc::new(dispatcher), SchedulerConfig::default()).unwrap();

    let first = queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();
    let second = queue
        .create_event(EventType::DinnerQueen, &EventMessage::update("1"))
        .await
        .unwrap();

    // Acquire fails: nothing changes hands and the next tick runs.
    queue.fail_acquire.store(true, Ordering::SeqCst);
    assert!(scheduler.poll_once().await.is_err());
    let outcome = scheduler.poll_once().await.unwrap();
    assert!(
        matches!(outcome, PollOutcome::Processed { ref event, .. } if event.id == first.id),
        "{outcome:?}"
    );

    // Status write fails after dispatch: the event is left PROCESSING.
    queue.fail_set_status.store(true, Ordering::SeqCst);
    assert!(scheduler.poll_once().await.is_err());
    assert_eq!(
        queue.get_event(second.id).await.unwrap().event_status,
        EventStatus::Processing
    );
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[test]
fn rejects_zero_poll_interval() {
    let queue = Arc::new(MemoryQueue::new());
    let dispatcher = Dispatcher::new(EventLogger::new(queue.clone()));
    let config = SchedulerConfig {
        poll_interval: Duration::ZERO,
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        Scheduler::new(queue, Arc::new(dispatcher), config),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn producer_queues_default_source_once() {
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(&queue, vec![]);

    let first = scheduler.produce_once().await.unwrap();
    let RefreshOutcome::Queued(event) = first else {
        panic!("expected Queued, got {first:?}");
    };
    assert_eq!(event.event_type, EventType::DinnerQueen);
    assert_eq!(event.event_message, EventMessage::All);

    assert_eq!(
        scheduler.produce_once().await.unwrap(),
        RefreshOutcome::AlreadyPending
    );
    assert_eq!(queue.events().await.len(), 1);
}

#[tokio::test]
async fn campaign_refresh_queues_single_target() {
    let queue = Arc::new(MemoryQueue::new());
    let campaign = CampaignRef {
        resource_provider: "DINNER_QUEEN".to_string(),
        duplicate_id: "DINNER_QUEEN_1234".to_string(),
    };

    let outcome = request_campaign_refresh(queue.as_ref(), &campaign)
        .await
        .unwrap();
    let RefreshOutcome::Queued(event) = outcome else {
        panic!("expected Queued");
    };
    assert_eq!(event.event_message, EventMessage::update("1234"));

    assert_eq!(
        request_campaign_refresh(queue.as_ref(), &campaign)
            .await
            .unwrap(),
        RefreshOutcome::AlreadyPending
    );
}

#[test]
fn rejects_invalid_schedule() {
    let queue = Arc::new(MemoryQueue::new());
    let dispatcher = Dispatcher::new(EventLogger::new(queue.clone()));
    let config = SchedulerConfig {
        producer_schedule: "every morning".to_string(),
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        Scheduler::new(queue, Arc::new(dispatcher), config),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn run_processes_waiting_events_until_shutdown() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = fixed(&queue, summary(2, 2, 0));
    let config = SchedulerConfig {
        poll_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let scheduler = scheduler_with(&queue, vec![worker.clone()], config);

    queue
        .create_event(EventType::DinnerQueen, &EventMessage::All)
        .await
        .unwrap();
    queue
        .create_event(EventType::DinnerQueen, &EventMessage::update("9"))
        .await
        .unwrap();

    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events = queue.events().await;
        if events.iter().all(|e| e.event_status == EventStatus::Done) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "events not processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(worker.runs.load(Ordering::SeqCst), 2);
}
