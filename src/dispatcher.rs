//! Worker registry and dispatch.
//!
//! Maps each event type to the one worker that handles it. The registry is
//! built at startup and read-only afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::info;

use crate::error::{Error, Result};
use crate::logger::EventLogger;
use crate::model::{EventType, ParsingEvent};
use crate::telemetry::metrics;
use crate::worker::{BatchWorker, CommandSource, RunSummary, Worker, WorkerConfig, WorkerRequest};

pub struct Dispatcher {
    workers: HashMap<EventType, Arc<dyn Worker>>,
    logger: EventLogger,
}

impl Dispatcher {
    /// Create a dispatcher with no workers.
    pub fn new(logger: EventLogger) -> Self {
        Self {
            workers: HashMap::new(),
            logger,
        }
    }

    /// Load every `.toml` worker definition in `dir`.
    pub fn load_from_dir(dir: &Path, logger: EventLogger) -> Result<Self> {
        let mut dispatcher = Self::new(logger);

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read worker dir {}: {e}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let config = WorkerConfig::load(&path)?;
            let policy = config.policy();
            let worker = BatchWorker::new(
                CommandSource::new(config),
                policy,
                dispatcher.logger.clone(),
            );
            dispatcher.register(Arc::new(worker)).map_err(|e| {
                Error::Config(format!("{}: {e}", path.display()))
            })?;
        }

        Ok(dispatcher)
    }

    /// Register a worker under its event type. One worker per type.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Result<()> {
        let event_type = worker.event_type();
        if self.workers.contains_key(&event_type) {
            return Err(Error::Config(format!(
                "a worker for {event_type} is already registered"
            )));
        }
        info!(%event_type, "worker registered");
        self.workers.insert(event_type, worker);
        Ok(())
    }

    pub fn supports(&self, event_type: EventType) -> bool {
        self.workers.contains_key(&event_type)
    }

    /// Run the worker registered for the event's type.
    ///
    /// With no registered worker nothing is invoked and a one-target,
    /// zero-success summary is returned, so the caller records FAIL.
    pub async fn dispatch(&self, event: &ParsingEvent) -> RunSummary {
        let Some(worker) = self.workers.get(&event.event_type) else {
            metrics::events_unroutable()
                .add(1, &[KeyValue::new("event_type", event.event_type.as_str())]);
            let err = Error::UnsupportedEventType(event.event_type.to_string());
            self.logger
                .error("no worker registered", &err, "dispatch", Some(event.id))
                .await;
            return RunSummary {
                total: 1,
                success_count: 0,
                failed_count: 0,
            };
        };

        let request = WorkerRequest {
            event_id: event.id,
            target_ids: event
                .event_message
                .target_id()
                .map(|target| vec![target.to_string()]),
        };
        worker.run(request).await
    }
}
