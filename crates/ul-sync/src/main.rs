//! ul-sync - push vendor records into the Unified Listing

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ul_common::logging::{init_logging, LogConfig, LogLevel};
use ul_sync::config::SyncConfig;
use ul_sync::reconcile::plan;
use ul_sync::record::load_records;
use ul_sync::sync::SourceSync;

#[derive(Parser, Debug)]
#[command(name = "ul-sync")]
#[command(author, version, about = "Synchronize vendor product records into the Unified Listing")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "UL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a downloaded record set against the API and write changes
    Sync {
        /// Source key, e.g. "gari" or "eastin"
        #[arg(short, long)]
        source: String,

        /// JSON file of records produced by the source's downloader
        #[arg(short, long)]
        input: PathBuf,

        /// Plan only; report what would be written
        #[arg(long)]
        dry_run: bool,

        /// Override the configured write concurrency
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write failed/updated record sets here
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Diff two record files offline and print the plan counts
    Plan {
        /// Incoming records
        #[arg(short, long)]
        input: PathBuf,

        /// Records currently stored
        #[arg(short, long)]
        existing: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    let base = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("ul-sync")
        .build();

    let _log_guard = match LogConfig::from_env_or(base).and_then(|c| init_logging(&c)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Sync {
            source,
            input,
            dry_run,
            concurrency,
            output_dir,
        } => {
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if output_dir.is_some() {
                config.output_dir = output_dir;
            }

            let records = load_records(&input)
                .with_context(|| format!("Failed to read records from {}", input.display()))?;
            info!(source = %source, records = records.len(), "Loaded incoming records");

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing in-flight writes");
                    on_interrupt.cancel();
                }
            });

            let sync = SourceSync::new(config)?.with_cancellation(cancel);

            if dry_run {
                let plan = sync.plan(&source, records).await?;
                println!("{}", serde_json::to_string_pretty(&plan.counts())?);
            } else {
                let report = sync.run(&source, records).await?;
                let counts = report.summary();
                println!("{}", serde_json::to_string_pretty(&counts)?);
                if counts.abandoned > 0 {
                    anyhow::bail!("Interrupted with {} writes not attempted", counts.abandoned);
                }
            }
        },
        Command::Plan { input, existing } => {
            let incoming = load_records(&input)
                .with_context(|| format!("Failed to read records from {}", input.display()))?;
            let stored = load_records(&existing)
                .with_context(|| format!("Failed to read records from {}", existing.display()))?;

            let plan = plan(incoming, &stored, &config.reconcile_options());
            println!("{}", serde_json::to_string_pretty(&plan.counts())?);
        },
    }

    Ok(())
}
