//! MDS Ingest - market data sync

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mds_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mds_ingest::db::{self, PgCheckpointStore, PgMarketDataStore};
use mds_ingest::sources::{BlsClient, CensusClient, HudClient};
use mds_ingest::sync::{Sources, SyncAllError, SyncOrchestrator, SyncRequest, SyncResult};
use mds_ingest::{Config, SyncSource};

#[derive(Parser, Debug)]
#[command(name = "mds-ingest")]
#[command(author, version, about = "Sync HUD, Census and BLS market data into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Comma-separated sources to sync (hud,census,bls) or "all"
    #[arg(long, env = "SYNC_SOURCES", default_value = "all")]
    sources: String,

    /// State code for HUD FMR data
    #[arg(long, default_value = "TX")]
    state: String,

    /// Census ACS survey year (default: previous year)
    #[arg(long)]
    census_year: Option<i32>,

    /// BLS start year (default: two years before the end year)
    #[arg(long)]
    bls_start_year: Option<i32>,

    /// BLS end year (default: current year)
    #[arg(long)]
    bls_end_year: Option<i32>,

    /// Resume a BLS session from its checkpoint
    #[arg(long, value_name = "SESSION")]
    resume: Option<String>,

    /// Items in flight at once (overrides SYNC_MAX_CONCURRENT)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Retries per BLS county (overrides SYNC_MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Fetch and count without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the latest checkpoint for a source
    Checkpoint {
        #[arg(long, default_value = "bls")]
        source: SyncSource,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("mds-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // environment variables take precedence
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {}", e);
            None
        },
    };

    if let Err(e) = run(cli).await {
        error!(error = %e, "Sync failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if cli.dry_run {
        config.sync.dry_run = true;
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.sync.max_concurrent = max_concurrent;
    }
    if let Some(max_retries) = cli.max_retries {
        config.sync.max_retries = max_retries;
    }

    if let Some(Command::Checkpoint { source }) = cli.command {
        return show_checkpoint(&config, source).await;
    }

    let selected = parse_sources(&cli.sources);
    let sources_to_validate = selected.clone().unwrap_or_else(|| SyncSource::ALL.to_vec());
    config
        .validate(&sources_to_validate)
        .context("Configuration validation failed")?;

    if cli.resume.is_some() && !sources_to_validate.contains(&SyncSource::Bls) {
        warn!("--resume only applies to BLS; ignoring it");
    }

    info!(
        sources = ?sources_to_validate,
        state = %cli.state,
        dry_run = config.sync.dry_run,
        max_concurrent = config.sync.max_concurrent,
        "Starting market data sync"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let orchestrator = build_orchestrator(&config).await?;
    let request = SyncRequest {
        state: Some(cli.state),
        census_year: cli.census_year,
        bls_start_year: cli.bls_start_year,
        bls_end_year: cli.bls_end_year,
        resume: cli.resume,
    };

    let mut results = Vec::new();
    let mut failures = 0;

    match selected {
        None => match orchestrator.sync_all(&request, &cancel).await {
            Ok(all) => results = all,
            Err(SyncAllError {
                failed,
                completed,
                error,
            }) => {
                error!(source = %failed, error = %error, "Sync failed");
                results = completed;
                failures += 1;
            },
        },
        Some(sources) => {
            for source in sources {
                if cancel.is_cancelled() {
                    info!("Sync cancelled");
                    break;
                }
                match orchestrator.run(source, &request, &cancel).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!(source = %source, error = %e, "Sync failed");
                        failures += 1;
                    },
                }
            }
        },
    }

    print_summary(&results);

    if failures > 0 {
        anyhow::bail!("{} source(s) failed", failures);
    }

    info!("Market data sync completed");
    Ok(())
}

async fn build_orchestrator(config: &Config) -> Result<SyncOrchestrator> {
    let sources = Sources {
        rent: Arc::new(HudClient::new(config.api_keys.hud.clone().unwrap_or_default())?),
        demographics: Arc::new(CensusClient::new(config.api_keys.census.clone())?),
        employment: Arc::new(BlsClient::new(config.api_keys.bls.clone())?),
    };
    let options = config.sync_options();

    let Some(db_config) = config.db_config() else {
        info!("No DATABASE_URL set, dry run without a database");
        return Ok(SyncOrchestrator::dry_run(sources, options));
    };

    let pool = db::create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(SyncOrchestrator::new(
        sources,
        Arc::new(PgMarketDataStore::new(pool.clone())),
        Arc::new(PgCheckpointStore::new(pool)),
        options,
    ))
}

async fn show_checkpoint(config: &Config, source: SyncSource) -> Result<()> {
    let db_config = config
        .db_config()
        .context("DATABASE_URL environment variable is required")?;
    let pool = db::create_pool(&db_config).await?;
    db::run_migrations(&pool).await?;

    let store = PgCheckpointStore::new(pool);
    let manager = mds_ingest::sync::CheckpointManager::new(Arc::new(store));

    match manager.latest(source).await? {
        Some(checkpoint) => {
            println!("Latest {} checkpoint:", source);
            println!("  Session:        {}", checkpoint.session_id);
            println!("  Status:         {}", checkpoint.status);
            println!(
                "  Last completed: {}",
                checkpoint.last_completed_entity.as_deref().unwrap_or("-")
            );
            println!("  Records:        {}", checkpoint.total_records_synced);
            println!("  List version:   {}", checkpoint.work_list_version);
            println!("  Started:        {}", checkpoint.started_at);
            println!("  Updated:        {}", checkpoint.last_updated_at);
        },
        None => println!("No {} checkpoint found", source),
    }
    Ok(())
}

/// `None` selects every source. Unknown names are ignored, and a list with
/// no known names falls back to every source.
fn parse_sources(raw: &str) -> Option<Vec<SyncSource>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return None;
    }

    let mut sources = Vec::new();
    for part in raw.split(',') {
        match part.trim().parse::<SyncSource>() {
            Ok(source) if !sources.contains(&source) => sources.push(source),
            Ok(_) => {},
            Err(_) => warn!(source = part.trim(), "Ignoring unknown source"),
        }
    }

    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}

fn print_summary(results: &[SyncResult]) {
    println!("\n=== Sync Summary ===");
    for result in results {
        println!();
        print!("{}", result);
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping sync"),
        _ = terminate => info!("Received terminate signal, stopping sync"),
    }

    token.cancel();
}
