//! refsweep - referential-integrity reconciliation sweeps
//!
//! Loads a source collection and a target id set, classifies records whose
//! declared reference points at a missing target, deletes exactly those
//! records, and re-verifies that zero orphans remain. Reports are structured
//! for machine consumption; `check` mode reports without writing.

mod config;
mod error;
mod record;
mod reference;
mod report;
mod store;
mod sweep;

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;
use crate::error::SweepError;
use crate::record::json_record;
use crate::reference::Reference;
use crate::report::SweepReport;
use crate::store::{DocumentStore, PostgresStore};
use crate::sweep::SweepMode;

#[derive(Parser)]
#[command(name = "refsweep")]
#[command(about = "Referential-integrity reconciliation sweeps for document collections")]
#[command(version)]
struct Cli {
    /// Report output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and delete records whose reference points at a missing target
    #[command(after_help = "\
Examples:
  refsweep sweep -r 'orders.product_id->products'
  refsweep sweep -r 'orders.vendor_id->vendors' -r 'reviews.order_id->orders'
  refsweep sweep -r 'tests.order_id->orders' --deadline-secs 300 --format json")]
    Sweep {
        /// Reference declaration `source.field->target`; repeatable, swept
        /// strictly in the order given
        #[arg(long = "reference", short = 'r', required = true)]
        references: Vec<Reference>,

        /// Overall per-sweep deadline in seconds (overrides SWEEP_DEADLINE_SECS)
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Classify and report orphans without writing anything
    Check {
        /// Reference declaration `source.field->target`; repeatable
        #[arg(long = "reference", short = 'r', required = true)]
        references: Vec<Reference>,

        /// Overall per-run deadline in seconds (overrides SWEEP_DEADLINE_SECS)
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Flat key=value lines
    Text,
    /// Pretty-printed JSON
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    let (mode, references, deadline_override) = match cli.command {
        Commands::Sweep {
            references,
            deadline_secs,
        } => (SweepMode::Sweep, references, deadline_secs),
        Commands::Check {
            references,
            deadline_secs,
        } => (SweepMode::Check, references, deadline_secs),
    };

    let deadline = deadline_override
        .or(settings.deadline_secs)
        .map(Duration::from_secs);

    info!(
        "Connecting to store at {}:{}/{}",
        settings.store.host, settings.store.port, settings.store.database
    );
    let store = PostgresStore::connect(&settings.store).await?;

    // The store is left at the last committed write on cancellation,
    // consistent with the non-transactional deletion model.
    tokio::select! {
        result = run_references(&store, &references, mode, deadline, cli.format) => result,
        _ = shutdown_signal() => {
            error!("Cancelled before all sweeps completed");
            Err(SweepError::Cancelled.into())
        }
    }
}

/// Run one sweep per declared reference, strictly in the order given.
///
/// Fatal store faults (connection, read) abort the remaining references;
/// completed-but-failed runs emit their report and continue to the next.
async fn run_references(
    store: &dyn DocumentStore,
    references: &[Reference],
    mode: SweepMode,
    deadline: Option<Duration>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut failed = 0usize;

    for reference in references {
        match sweep::run_with_deadline(store, reference, json_record, mode, deadline).await {
            Ok(report) => {
                emit(&report, format)?;
                if !report.passed() {
                    failed += 1;
                }
            }
            Err(err) => match err.report() {
                Some(report) => {
                    emit(report, format)?;
                    error!(reference = %reference, "{}", err);
                    failed += 1;
                }
                None => return Err(err.into()),
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} run(s) failed", failed, references.len());
    }
    Ok(())
}

fn emit(report: &SweepReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,refsweep=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current write");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current write");
        },
    }
}
