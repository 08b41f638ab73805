//! Slotflow application binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Install the tracing subscriber
//! 3. Open the record database (unless running ephemeral)
//! 4. Build the engine: registry, guarded rule extractor, persistence gateway
//! 5. Run the requested command

mod cli;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use slotflow_core::config::SlotflowConfig;
use slotflow_core::error::SlotflowError;
use slotflow_core::types::{SessionId, UserId};
use slotflow_engine::{
    ConversationEngine, DomainRegistry, EngineError, GuardedExtractor, InMemoryGateway,
    PersistenceGateway, RuleExtractor, SqliteGateway, TurnInput,
};
use slotflow_storage::{Database, RecordQuery, RecordRepository};

use cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Load the config file, keeping the failure so it can be logged once
/// tracing is installed.
fn load_config(path: &Path) -> (SlotflowConfig, Option<SlotflowError>) {
    match SlotflowConfig::load(path) {
        Ok(config) => (config, None),
        Err(e) => (SlotflowConfig::default(), Some(e)),
    }
}

fn report_config_load(path: &Path, error: Option<&SlotflowError>) {
    match error {
        None => tracing::info!(path = %path.display(), "Configuration loaded"),
        Some(SlotflowError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No config file, using defaults")
        }
        Some(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults")
        }
    }
}

fn open_repository(
    config: &SlotflowConfig,
) -> Result<Arc<RecordRepository>, Box<dyn std::error::Error>> {
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.persistence.database_file);
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    Ok(Arc::new(RecordRepository::new(Arc::new(db))))
}

/// Drop idle sessions on an interval.
async fn purge_loop(engine: Arc<ConversationEngine>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let purged = engine.purge_idle();
        if purged > 0 {
            tracing::debug!(purged, "Idle session sweep");
        }
    }
}

async fn run_chat(
    config: &SlotflowConfig,
    user: String,
    session: Option<String>,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway: Arc<dyn PersistenceGateway> = if ephemeral {
        tracing::info!("Ephemeral mode: records are kept in memory only");
        Arc::new(InMemoryGateway::new())
    } else {
        Arc::new(SqliteGateway::new(open_repository(config)?))
    };
    let extractor = Arc::new(GuardedExtractor::new(
        Arc::new(RuleExtractor::new()),
        &config.extraction,
    ));
    let engine = Arc::new(ConversationEngine::new(
        config,
        DomainRegistry::with_defaults(config),
        extractor,
        gateway,
    ));

    let purge_engine = Arc::clone(&engine);
    let purge_interval = config.session.purge_interval_secs;
    tokio::spawn(async move {
        purge_loop(purge_engine, purge_interval).await;
    });

    let session_id = SessionId::from(session.unwrap_or_else(|| Uuid::new_v4().to_string()));
    let user_id = UserId::from(user);
    tracing::info!(session_id = %session_id, user_id = %user_id, "Chat session started");

    println!("What did you do today? (type 'exit' to leave)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" | "q" => break,
            ":state" => {
                match engine.snapshot(&session_id, &user_id).await {
                    Ok(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                    Err(e) => println!("{}", e),
                }
                continue;
            }
            _ => {}
        }

        let input = TurnInput::new(session_id.clone(), user_id.clone(), line);
        match engine.handle_turn(input).await {
            Ok(outcome) => println!("{}", outcome.text()),
            Err(EngineError::ExtractionUnavailable(reason)) => {
                tracing::warn!(%reason, "Turn dropped, extractor unavailable");
                println!("I'm having trouble understanding right now. Please say that again.");
            }
            Err(e) => println!("{}", e),
        }
    }

    engine.close_session(&session_id);
    println!("Goodbye!");
    Ok(())
}

fn run_history(
    config: &SlotflowConfig,
    user: String,
    domain: Option<String>,
    movement: Option<String>,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let repository = open_repository(config)?;
    let mut query = RecordQuery::for_user(user);
    query.limit = limit;
    query.domain = domain;
    if let Some(movement) = movement {
        query.domain.get_or_insert_with(|| "workout".to_string());
        query.field_equals = Some(("movement".to_string(), movement));
    }

    let records = repository.query(&query)?;
    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }
    for record in records {
        let at = record.created_at.with_timezone(&chrono::Local);
        println!(
            "{}  {:<11}  {}  {}",
            at.format("%Y-%m-%d %H:%M"),
            record.domain,
            record.summary,
            record.id
        );
    }
    Ok(())
}

fn run_delete(
    config: &SlotflowConfig,
    user: String,
    id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let repository = open_repository(config)?;
    if repository.delete(id, &user)? {
        tracing::info!(record_id = %id, "Record deleted");
        println!("Deleted {}.", id);
    } else {
        println!("No record {} for {}.", id, user);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is loaded before tracing so the file's log level can apply.
    let config_file = args.resolve_config_path();
    let (config, load_error) = load_config(&config_file);

    // Logs go to stderr so the conversation on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    args.resolve_log_level(&config.general.log_level),
                )
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    report_config_load(&config_file, load_error.as_ref());

    tracing::info!(path = %config_file.display(), "Starting slotflow v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Chat {
            user,
            session,
            ephemeral,
        } => run_chat(&config, user, session, ephemeral).await,
        Command::History {
            user,
            domain,
            movement,
            limit,
        } => run_history(&config, user, domain, movement, limit),
        Command::Delete { user, id } => run_delete(&config, user, id),
    }
}
