use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use quote_reconciler::app::ports::RepositoryGateway;
use quote_reconciler::config::ReconcileConfig;
use quote_reconciler::domain::{RunId, StagingStore};
use quote_reconciler::infra::sqlite_gateway::SqliteGateway;
use quote_reconciler::logging;
use quote_reconciler::pipeline::{ApplyOutcome, Applier, ReconciliationPipeline, RunOptions};

#[derive(Parser)]
#[command(name = "quote-reconciler")]
#[command(about = "Replace legacy vehicle codes on quotes with canonical catalog ids")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, match, stage and apply in one run
    Run {
        /// Stage changes without applying them to the quote store
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply the staged values of an earlier run
    Apply {
        #[arg(long)]
        run_id: RunId,
    },
    /// Remove staged records, for one run or all of them
    ClearStaging {
        #[arg(long)]
        run_id: Option<RunId>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ReconcileConfig> {
    let config = match path {
        Some(path) => ReconcileConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ReconcileConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

fn print_apply(outcome: &ApplyOutcome) {
    match outcome {
        ApplyOutcome::Applied(summary) => {
            println!("   Staged values: {}", summary.staged);
            println!("   Quotes matched: {}", summary.matched);
            println!("   Quotes modified: {}", summary.modified);
            println!("   Missing targets: {}", summary.missing);
        }
        ApplyOutcome::NoWork => println!("   Nothing staged to apply"),
        ApplyOutcome::StageGateFailure => println!("   Apply skipped: match stage failed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let _guard = logging::init_logging(&config.log_dir);

    let gateway: Arc<dyn RepositoryGateway> =
        Arc::new(SqliteGateway::from_config(&config.store).context("opening document store")?);

    match cli.command {
        Commands::Run { dry_run } => {
            let pipeline = ReconciliationPipeline::new(gateway, config);
            let report = pipeline.run(RunOptions { dry_run }).await;

            println!("\n📊 Reconciliation run {}:", report.run_id);
            println!("   Candidates: {}", report.candidates);
            println!("   Skipped (missing or unreadable): {}", report.skipped.len());
            if let Some(version_id) = &report.version_id {
                println!("   Catalog version: {}", version_id);
            }
            println!("   Staged pairs: {}", report.staged_pairs);
            println!("   No match: {}", report.no_match);
            println!("   Ambiguous: {}", report.ambiguous);
            if let Some(apply) = &report.apply {
                print_apply(apply);
            }

            if let Some(failure) = &report.failure {
                error!("Run failed: {}", failure);
                anyhow::bail!("reconciliation run {} failed: {}", report.run_id, failure);
            }
            if !report.succeeded() {
                anyhow::bail!("reconciliation run {} did not succeed", report.run_id);
            }
            info!("Run {} completed", report.run_id);
        }
        Commands::Apply { run_id } => {
            warn!(%run_id, "Applying staged values from an earlier run");
            let outcome = Applier::new(gateway)
                .apply_recorded(run_id)
                .await
                .with_context(|| format!("applying run {run_id}"))?;
            println!("\n📥 Apply for run {}:", run_id);
            print_apply(&outcome);
        }
        Commands::ClearStaging { run_id } => {
            let mut removed = 0;
            for store in [StagingStore::NewValues, StagingStore::AuditLog] {
                removed += gateway
                    .clear_staging(store, run_id)
                    .await
                    .with_context(|| format!("clearing {store}"))?;
            }
            println!("🧹 Removed {} staged records", removed);
        }
    }
    Ok(())
}
