use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use facepass::catalog::open_catalog;
use facepass::config::Config;
use facepass::db::Database;
use facepass::error::ErrorKind;
use facepass::faces::{EmbeddingExtractor, OnnxExtractor};
use facepass::health::HealthReport;
use facepass::indexing::{IndexMode, IndexingOrchestrator};
use facepass::logging::{self, LogTarget};
use facepass::search::SearchOrchestrator;
use facepass::storage::{LocalObjectStorage, SessionLayout};

enum Command {
    Index { session: String, force: bool },
    Search {
        session: String,
        selfie: PathBuf,
        threshold: Option<f32>,
        limit: Option<usize>,
    },
    Status { session: String },
    Delete { session: String },
    Health,
}

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut force = false;
    let mut threshold = None;
    let mut limit = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facepass {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            "--force" | "-f" => {
                force = true;
            }
            "--threshold" | "-t" => {
                match args.get(i + 1).map(|v| v.parse::<f32>()) {
                    Some(Ok(value)) => threshold = Some(value),
                    _ => usage_error("--threshold requires a number"),
                }
                i += 1;
            }
            "--limit" | "-n" => {
                match args.get(i + 1).map(|v| v.parse::<usize>()) {
                    Some(Ok(value)) => limit = Some(value),
                    _ => usage_error("--limit requires a positive integer"),
                }
                i += 1;
            }
            arg if arg.starts_with('-') => {
                usage_error(&format!("Unknown argument: {}", arg));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("index") => Command::Index {
            session: positional.next().unwrap_or_else(|| usage_error("index requires a session id")),
            force,
        },
        Some("search") => {
            let session = positional.next().unwrap_or_else(|| usage_error("search requires a session id"));
            let selfie = positional.next().unwrap_or_else(|| usage_error("search requires a selfie path"));
            Command::Search {
                session,
                selfie: PathBuf::from(selfie),
                threshold,
                limit,
            }
        }
        Some("status") => Command::Status {
            session: positional.next().unwrap_or_else(|| usage_error("status requires a session id")),
        },
        Some("delete") => Command::Delete {
            session: positional.next().unwrap_or_else(|| usage_error("delete requires a session id")),
        },
        Some("health") => Command::Health,
        Some(other) => usage_error(&format!("Unknown command: {}", other)),
        None => usage_error("no command given"),
    };

    if let Some(extra) = positional.next() {
        usage_error(&format!("Unexpected argument: {}", extra));
    }

    Cli { config_path, command }
}

fn print_help() {
    println!(
        r#"facepass - find a person's photos in a session from a selfie

USAGE:
    facepass [OPTIONS] <COMMAND>

COMMANDS:
    index <SESSION> [--force]       Index the session's photos (--force rebuilds)
    search <SESSION> <SELFIE>       Search the session for photos of the selfie's face
        --threshold, -t T           Minimum similarity, 0.0-1.0 (default from config)
        --limit, -n N               Maximum matches (default from config)
    status <SESSION>                Show indexing status
    delete <SESSION>                Delete the session's embeddings
    health                          Check database and model

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACEPASS_CONFIG     Path to config file (overrides default location)
    FACEPASS_LOG        Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facepass/config.toml
Output is JSON on stdout; exit code 1 on error."#
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
    kind: ErrorKind,
}

fn fail(kind: ErrorKind, error: &dyn std::fmt::Display) -> ! {
    let output = ErrorOutput {
        error: error.to_string(),
        kind,
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(_) => eprintln!("Error: {}", error),
    }
    std::process::exit(1);
}

fn parse_session(session: &str) -> Uuid {
    Uuid::parse_str(session)
        .unwrap_or_else(|e| fail(ErrorKind::BadInput, &format!("invalid session id {:?}: {}", session, e)))
}

fn build_indexer(
    config: &Config,
    extractor: Arc<dyn EmbeddingExtractor>,
    db: Arc<Database>,
) -> Arc<IndexingOrchestrator> {
    Arc::new(IndexingOrchestrator::new(
        extractor,
        db,
        Arc::new(LocalObjectStorage::new(&config.storage.root)),
        SessionLayout::from(&config.storage),
        config.indexing.clone(),
    ))
}

fn run(cli: Cli) -> Result<()> {
    let started_at = Instant::now();

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.database, config.faces.embedding_dimension)
        .context("Failed to open embedding store")?;
    db.initialize().context("Failed to initialize embedding store")?;
    let db = Arc::new(db);

    match cli.command {
        Command::Index { session, force } => {
            let session_id = parse_session(&session);
            let extractor: Arc<dyn EmbeddingExtractor> =
                Arc::new(OnnxExtractor::load_or_unloaded(&config.faces));
            let indexer = build_indexer(&config, extractor, db);
            let mode = if force { IndexMode::Force } else { IndexMode::Incremental };

            match indexer.index_session(&session_id, mode) {
                Ok(report) => print_json(&report)?,
                Err(e) => fail(e.kind(), &e),
            }
        }
        Command::Search {
            session,
            selfie,
            threshold,
            limit,
        } => {
            let session_id = parse_session(&session);
            let bytes = std::fs::read(&selfie)
                .unwrap_or_else(|e| fail(ErrorKind::BadInput, &format!("cannot read {:?}: {}", selfie, e)));

            let catalog = open_catalog(&config.catalog).context("Failed to open photo catalog")?;
            let extractor: Arc<dyn EmbeddingExtractor> =
                Arc::new(OnnxExtractor::load_or_unloaded(&config.faces));
            let indexer = build_indexer(&config, extractor.clone(), db.clone());
            let search = SearchOrchestrator::new(
                catalog,
                extractor,
                db,
                indexer,
                config.faces.similarity_threshold,
                config.search.clone(),
            );

            match search.search(&session_id, &bytes, threshold, limit) {
                Ok(result) => print_json(&result)?,
                Err(e) => fail(e.kind(), &e),
            }
        }
        Command::Status { session } => {
            let session_id = parse_session(&session);
            let extractor: Arc<dyn EmbeddingExtractor> = Arc::new(OnnxExtractor::unloaded(&config.faces));
            let indexer = build_indexer(&config, extractor, db);
            match indexer.session_status(&session_id) {
                Ok(status) => print_json(&status)?,
                Err(e) => fail(ErrorKind::Fault, &e),
            }
        }
        Command::Delete { session } => {
            let session_id = parse_session(&session);
            let extractor: Arc<dyn EmbeddingExtractor> = Arc::new(OnnxExtractor::unloaded(&config.faces));
            let indexer = build_indexer(&config, extractor, db);
            match indexer.delete_session(&session_id) {
                Ok(deleted) => print_json(&serde_json::json!({
                    "session_id": session_id,
                    "deleted": deleted,
                }))?,
                Err(e) => fail(ErrorKind::Fault, &e),
            }
        }
        Command::Health => {
            let extractor = OnnxExtractor::load_or_unloaded(&config.faces);
            let report = HealthReport::collect(&db, &extractor, started_at);
            print_json(&report)?;
            if !report.healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn main() {
    let cli = parse_args();

    // stdout carries JSON, so logs go to journald or a file
    let _ = logging::init(LogTarget::File(Some(Config::config_dir().join("logs"))));

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "Command failed");
        fail(ErrorKind::Fault, &format!("{:#}", e));
    }
}
