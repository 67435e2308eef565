//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::EventType;
use crate::scheduler::SchedulerConfig;
use chrono::FixedOffset;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Directory of worker TOML definitions.
    pub workers_dir: PathBuf,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let defaults = SchedulerConfig::default();

        let timezone = match optional_var("SCHEDULER_UTC_OFFSET") {
            Some(offset) => offset.parse::<FixedOffset>().map_err(|e| {
                Error::Config(format!("SCHEDULER_UTC_OFFSET '{offset}' is not an offset like +09:00: {e}"))
            })?,
            None => defaults.timezone,
        };

        let poll_interval = match optional_var("POLL_INTERVAL_SECS") {
            Some(secs) => match secs.parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(Error::Config(format!(
                        "POLL_INTERVAL_SECS '{secs}' must be a positive integer"
                    )));
                }
            },
            None => defaults.poll_interval,
        };

        let default_source = match optional_var("DEFAULT_SOURCE") {
            Some(name) => name
                .parse::<EventType>()
                .map_err(|e| Error::Config(format!("DEFAULT_SOURCE: {e}")))?,
            None => defaults.default_source,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            workers_dir: optional_var("WORKERS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("workers")),
            scheduler: SchedulerConfig {
                producer_schedule: optional_var("PRODUCER_SCHEDULE")
                    .unwrap_or(defaults.producer_schedule),
                timezone,
                default_source,
                poll_interval,
            },
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
