//! refreshq CLI: operator interface to the update-request queue.

use refreshq::config::Config;
use refreshq::config::secrets::ExposeSecret;
use refreshq::db::Db;
use refreshq::dispatcher::Dispatcher;
use refreshq::logger::EventLogger;
use refreshq::model::{EventId, EventMessage, EventStatus, EventType};
use refreshq::queue::EventQueue;
use refreshq::refresh::{RefreshOutcome, request_refresh};
use refreshq::scheduler::{PollOutcome, Scheduler};
use refreshq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "refreshq", about = "Keeps scraped campaign listings fresh")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon (producer + poller)
    Serve {
        /// Directory containing worker TOML definitions (default: $WORKERS_DIR)
        #[arg(long)]
        workers: Option<PathBuf>,
    },
    /// Run a single poll cycle and exit
    Tick {
        /// Directory containing worker TOML definitions (default: $WORKERS_DIR)
        #[arg(long)]
        workers: Option<PathBuf>,
    },
    /// Parsing event operations
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
}

#[derive(Subcommand)]
enum EventAction {
    /// Queue a refresh unless an equivalent one is pending
    Request {
        /// Event type, e.g. DINNER_QUEEN
        event_type: String,
        /// Refresh only this target instead of everything
        #[arg(long)]
        target: Option<String>,
    },
    /// List parsing events
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by event type
        #[arg(long, name = "type")]
        event_type: Option<String>,
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a parsing event
    Show {
        /// Event ID (full UUID or prefix)
        id: String,
    },
    /// Show an event's log lines
    Logs {
        /// Event ID (full UUID or prefix)
        id: String,
    },
    /// Override an event's status
    SetStatus {
        /// Event ID (full UUID or prefix)
        id: String,
        /// WAIT, PROCESSING, DONE or FAIL
        status: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { workers } => cmd_serve(config, workers).await,
        Command::Tick { workers } => cmd_tick(config, workers).await,
        Command::Event { action } => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;

            match action {
                EventAction::Request { event_type, target } => {
                    cmd_event_request(&db, event_type, target).await
                }
                EventAction::List {
                    status,
                    event_type,
                    limit,
                } => cmd_event_list(&db, status, event_type, limit).await,
                EventAction::Show { id } => cmd_event_show(&db, id).await,
                EventAction::Logs { id } => cmd_event_logs(&db, id).await,
                EventAction::SetStatus { id, status } => {
                    cmd_event_set_status(&db, id, status).await
                }
            }
        }
    }
}

async fn build_scheduler(config: &Config, workers: Option<PathBuf>) -> anyhow::Result<Scheduler> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.health_check().await?;
    let queue: Arc<dyn EventQueue> = Arc::new(db);

    let workers_dir = workers.unwrap_or_else(|| config.workers_dir.clone());
    let dispatcher =
        Dispatcher::load_from_dir(&workers_dir, EventLogger::new(Arc::clone(&queue)))?;
    if !dispatcher.supports(config.scheduler.default_source) {
        tracing::warn!(
            default_source = %config.scheduler.default_source,
            "no worker for the default source; its scheduled refreshes will FAIL"
        );
    }

    Ok(Scheduler::new(
        queue,
        Arc::new(dispatcher),
        config.scheduler.clone(),
    )?)
}

async fn cmd_serve(config: Config, workers: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from(&config))?;

    let scheduler = build_scheduler(&config, workers).await?;

    let sched = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sched.shutdown();
    });

    scheduler.run().await?;
    Ok(())
}

async fn cmd_tick(config: Config, workers: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from(&config))?;

    let scheduler = build_scheduler(&config, workers).await?;

    match scheduler.poll_once().await? {
        PollOutcome::Skipped | PollOutcome::Idle => println!("No waiting events."),
        PollOutcome::Processed {
            event,
            summary,
            status,
        } => {
            println!(
                "{} {} {} -> {status} (total {}, success {}, failed {}, unattempted {})",
                event.id,
                event.event_type,
                event.event_message,
                summary.total,
                summary.success_count,
                summary.failed_count,
                summary.unattempted()
            );
        }
    }
    Ok(())
}

async fn cmd_event_request(
    db: &Db,
    event_type: String,
    target: Option<String>,
) -> anyhow::Result<()> {
    let event_type: EventType = event_type.parse()?;
    let message = match target {
        Some(target) => EventMessage::update(target),
        None => EventMessage::All,
    };

    match request_refresh(db, event_type, message).await? {
        RefreshOutcome::Queued(event) => {
            println!("Queued: {} (status: {})", event.id, event.event_status);
        }
        RefreshOutcome::AlreadyPending => {
            println!("Already pending: an equivalent event is waiting or processing");
        }
    }
    Ok(())
}

async fn cmd_event_list(
    db: &Db,
    status: Option<String>,
    event_type: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status: Option<EventStatus> = status.map(|s| s.parse()).transpose()?;
    let event_type: Option<EventType> = event_type.map(|t| t.parse()).transpose()?;

    let events = db.list_events(status, event_type, limit).await?;

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<12}  {:<10}  {:<24}  {:<16}  COMPLETED",
        "ID", "TYPE", "STATUS", "MESSAGE", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for event in &events {
        let short_id = &event.id.to_string()[..8];
        println!(
            "{:<8}  {:<12}  {:<10}  {:<24}  {:<16}  {}",
            short_id,
            event.event_type,
            event.event_status,
            event.event_message.to_string(),
            event.created_at.format("%Y-%m-%d %H:%M"),
            event
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    println!("\n{} event(s)", events.len());
    Ok(())
}

/// Resolve a full UUID or a unique prefix of a recent event's ID.
async fn resolve_id(db: &Db, id_str: &str) -> anyhow::Result<EventId> {
    if id_str.len() >= 36 {
        return Ok(EventId(uuid::Uuid::parse_str(id_str)?));
    }

    let events = db.list_events(None, None, 200).await?;
    let matches: Vec<_> = events
        .iter()
        .filter(|event| event.id.to_string().starts_with(id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no event matching prefix '{id_str}'"),
        1 => Ok(matches[0].id),
        n => anyhow::bail!("{n} events match prefix '{id_str}', be more specific"),
    }
}

async fn cmd_event_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id = resolve_id(db, &id_str).await?;
    let event = db.get_event(id).await?;

    println!("ID:         {}", event.id);
    println!("Type:       {}", event.event_type);
    println!("Status:     {}", event.event_status);
    println!("Request:    {}", event.event_message.request_type().as_str());
    println!(
        "Target:     {}",
        event.event_message.target_id().unwrap_or("-")
    );
    println!("Created:    {}", event.created_at);
    if let Some(completed) = event.completed_at {
        println!("Completed:  {completed}");
    }

    Ok(())
}

async fn cmd_event_logs(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id = resolve_id(db, &id_str).await?;
    let logs = db.list_logs(id).await?;

    if logs.is_empty() {
        println!("No log lines for {id}.");
        return Ok(());
    }
    for entry in &logs {
        println!(
            "{}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.message
        );
    }
    Ok(())
}

async fn cmd_event_set_status(db: &Db, id_str: String, status: String) -> anyhow::Result<()> {
    let id = resolve_id(db, &id_str).await?;
    let status: EventStatus = status.parse()?;
    db.set_status(id, status).await?;
    println!("{id} -> {status}");
    Ok(())
}
