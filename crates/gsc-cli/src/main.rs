use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gsc_sync::SyncConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gsc-cli")]
#[command(about = "Search Console sync and content decay insights")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full sync and write reports.
    Sync,
    /// Apply database migrations.
    Migrate,
    /// Match a newline-separated URL list against CMS slugs.
    Match {
        file: PathBuf,
        /// Print full match results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print decay signals from already-synced metrics.
    Decay,
    /// Run the sync on GSC_SYNC_CRON until interrupted.
    Schedule,
    /// Summarize the most recent report directories.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GSC_LOG_JSON").is_ok_and(|v| matches!(v.as_str(), "1" | "true"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = gsc_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} rows={} unmatched={} signals={} tasks={} reports={}",
                summary.run_id,
                summary.rows_fetched,
                summary.unmatched_pages,
                summary.signals,
                summary.tasks_created,
                summary.reports_dir
            );
        }
        Commands::Migrate => {
            gsc_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Match { file, json } => {
            let results = gsc_sync::match_url_file_from_env(&file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in &results {
                    match &result.sanity_id {
                        Some(id) => println!(
                            "{}\t{}\t{}",
                            result.gsc_url,
                            result.confidence.as_str(),
                            id
                        ),
                        None => println!(
                            "{}\tunmatched\t{}",
                            result.gsc_url,
                            result.unmatch_reason.as_str()
                        ),
                    }
                }
            }
        }
        Commands::Decay => {
            let signals = gsc_sync::detect_decay_from_env().await?;
            for signal in &signals {
                println!(
                    "{}\t{}\t{}\tpos {:.1} -> {:.1}\tctr {:.4}",
                    signal.severity.as_str(),
                    signal.reason.as_str(),
                    signal.page,
                    signal.metrics.position_before,
                    signal.metrics.position_now,
                    signal.metrics.ctr_now
                );
            }
            println!("{} decay signal(s)", signals.len());
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            config.validate()?;
            let Some(mut sched) = gsc_sync::maybe_build_scheduler(&config).await? else {
                anyhow::bail!("scheduler could not be built");
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!(cron = %config.sync_cron, "scheduler started");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { runs } => {
            let root = SyncConfig::from_env().workspace_root;
            println!("{}", gsc_sync::report_daily_markdown(runs, &root)?);
        }
    }

    Ok(())
}
