//! # refreshq
//!
//! Update-request queue for scraped campaign listings.
//!
//! Refresh requests become parsing events in Postgres. A scheduler
//! queues a full refresh on a daily cadence and polls the queue; each
//! acquired event is handed to the worker registered for its source and
//! its outcome is recorded as DONE or FAIL.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod model;
pub mod queue;
pub mod refresh;
pub mod scheduler;
pub mod telemetry;
pub mod worker;
