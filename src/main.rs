//! # Recall CLI (`recall`)
//!
//! Each pipeline stage is an argument-free subcommand. All settings come from
//! the environment (an optional `.env` file in the working directory is
//! loaded first).
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite schema |
//! | `recall convert` | Convert new PDFs in the source into records |
//! | `recall enrich` | Summarise and tag records not yet enriched |
//! | `recall repair` | Initialise missing enrichment flags to `false` |
//! | `recall status` | Show record and checkpoint counts |
//!
//! A stage exits with status 0 once its run finishes, however many items
//! were skipped; it fails only when its candidates cannot be listed or its
//! configuration is incomplete.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recall_pipeline::config::Config;
use recall_pipeline::runner::RunReport;
use recall_pipeline::{conversion, enrichment, repair, sqlite_store, stats};

/// Recall: turn PDFs in object storage into summarised, searchable records.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Recall: PDF conversion and enrichment pipeline",
    version,
    long_about = "Recall converts PDF documents from object storage into markdown records \
    and enriches each record with a generated summary and extracted metadata. \
    Configuration is read from environment variables (and an optional .env file)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; every other command also does this first.
    Init,

    /// Convert unprocessed PDFs into document records.
    ///
    /// Lists the source, skips files with a conversion marker, and sends
    /// each remaining PDF to the configured converter.
    Convert,

    /// Add summaries and metadata to records not yet enriched.
    Enrich,

    /// Set the enrichment flag to false on records that lack it.
    ///
    /// Never overwrites an existing flag; safe to run at any time.
    Repair,

    /// Show record, checkpoint and claim counts.
    Status,
}

fn print_run_report(report: &RunReport) {
    println!("{} (run {})", report.stage, report.run_id);
    println!("  scanned: {}", report.scanned);
    println!("  already complete: {}", report.already_complete);
    println!("  completed: {}", report.completed);
    println!("  skipped: {}", report.skipped);
    if report.deferred > 0 {
        println!("  deferred: {}", report.deferred);
    }
    for failure in &report.failures {
        println!(
            "    {} [{}]: {}",
            failure.item, failure.step, failure.reason
        );
    }
    println!("ok");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command {
        Commands::Init => {
            let store = sqlite_store::SqliteStore::open(&cfg).await?;
            store.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Convert => {
            let report = conversion::run_conversion(&cfg).await?;
            print_run_report(&report);
        }
        Commands::Enrich => {
            let report = enrichment::run_enrichment(&cfg).await?;
            print_run_report(&report);
        }
        Commands::Repair => {
            let report = repair::run_repair(&cfg).await?;
            println!("repair");
            println!("  scanned: {}", report.scanned);
            println!("  initialized: {}", report.initialized);
            println!("ok");
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
    }

    Ok(())
}
