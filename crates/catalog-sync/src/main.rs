//! # Catalog Sync CLI (`catsync`)
//!
//! ```bash
//! catsync --config ./config/catsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catsync init` | Create the SQLite database and run schema migrations |
//! | `catsync probe` | Check that the upstream is reachable and report its size |
//! | `catsync sync full` | Re-derive the whole catalog from upstream |
//! | `catsync sync incremental` | Apply records modified since the last successful run |
//! | `catsync runs` | Show recent sync runs |
//! | `catsync serve` | Start the HTTP trigger server |
//!
//! Credentials come from `CATSYNC_API_KEY` and `CATSYNC_API_SECRET`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use catalog_sync::config::{self, Config, Credentials};
use catalog_sync::error::SyncError;
use catalog_sync::logging::{self, Verbosity};
use catalog_sync::sqlite_store::SqliteStore;
use catalog_sync::sync::{SyncEngine, TriggerResult};
use catalog_sync::{db, migrate, runs, server};

/// Catalog Sync: pulls product records from a paginated ERP API and
/// reconciles them into a local catalog store.
#[derive(Parser)]
#[command(name = "catsync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catsync.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Send one authenticated minimal request to the upstream.
    ///
    /// Never writes to the catalog or the run log.
    Probe {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a synchronization.
    Sync {
        #[command(subcommand)]
        kind: SyncCommand,

        /// Print the result as JSON.
        #[arg(long, global = true)]
        json: bool,
    },

    /// Show recent sync runs, newest first.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Print the runs as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP trigger server.
    Serve,
}

#[derive(Subcommand, Clone, Copy)]
enum SyncCommand {
    /// Fetch every page, reconcile, and sweep items gone upstream.
    Full,
    /// Fetch only records modified since the last successful run.
    Incremental,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Probe { json } => {
            let engine = build_engine(&cfg).await?;
            let report = engine.probe_connection().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.message);
            }
            if !report.reachable {
                anyhow::bail!("upstream unreachable");
            }
        }
        Commands::Sync { kind, json } => {
            let engine = build_engine(&cfg).await?;
            let cancel = CancellationToken::new();

            let signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping at the next page or batch");
                    signal.cancel();
                }
            });

            let result = match kind {
                SyncCommand::Full => engine.run_full(&cancel).await,
                SyncCommand::Incremental => engine.run_incremental(&cancel).await,
            };
            print_result(&result, json)?;
            if !result.success {
                anyhow::bail!("sync did not complete");
            }
        }
        Commands::Runs { limit, json } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            let store = SqliteStore::new(pool);
            runs::run_history(&store, &cfg.sync.source, limit, json).await?;
        }
        Commands::Serve => {
            let engine = Arc::new(build_engine(&cfg).await?);
            server::run_server(&cfg, engine).await?;
        }
    }

    Ok(())
}

/// Credentials first: a missing secret must fail before anything is opened.
async fn build_engine(cfg: &Config) -> Result<SyncEngine> {
    let credentials = Credentials::from_env().map_err(SyncError::from)?;
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(SyncEngine::from_config(cfg, credentials, pool)?)
}

fn print_result(result: &TriggerResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.message);
    if let Some(errors) = &result.errors {
        for line in errors.iter().take(10) {
            println!("  - {}", line);
        }
        if errors.len() > 10 {
            println!("  ({} more in run {})", errors.len() - 10, result.run_id.unwrap_or_default());
        }
    }
    Ok(())
}
