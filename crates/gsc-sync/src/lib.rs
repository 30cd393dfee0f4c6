//! Sync orchestration: configuration, rule files, the pipeline, reports and scheduling.

pub mod config;
pub mod pipeline;
pub mod report;
pub mod rules;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use gsc_analysis::{SlugTable, UrlMatcher};
use gsc_core::{DecaySignal, DocumentSource, MatchResult};
use gsc_storage::{ApiClient, PgStore, SanityClient};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub use config::SyncConfig;
pub use pipeline::{analyze, AnalysisInput, DryRunSink, Insights, SyncPipeline};
pub use report::{report_daily_markdown, write_reports, RunReport, SyncRunSummary};
pub use rules::{InsightRules, RulesError};

pub const CRATE_NAME: &str = "gsc-sync";

async fn pipeline_from_config(config: SyncConfig) -> Result<SyncPipeline> {
    let rules = InsightRules::from_workspace_root(&config.workspace_root)?;
    SyncPipeline::connect(config, rules).await
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let pipeline = pipeline_from_config(SyncConfig::from_env()).await?;
    pipeline.run_once().await
}

pub async fn migrate_from_env() -> Result<()> {
    let config = SyncConfig::from_env();
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    store.migrate().await?;
    info!("migrations applied");
    Ok(())
}

pub async fn detect_decay_from_env() -> Result<Vec<DecaySignal>> {
    let pipeline = pipeline_from_config(SyncConfig::from_env()).await?;
    pipeline.detect_only().await
}

/// Matches a newline-separated URL list against the CMS without touching Postgres.
pub async fn match_url_file_from_env(path: &Path) -> Result<Vec<MatchResult>> {
    let config = SyncConfig::from_env();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let urls = parse_url_list(&text);

    let http = ApiClient::new(config.http_client_config())?;
    let sanity = SanityClient::new(http, config.sanity.clone())?;
    let documents = sanity
        .fetch_documents(&config.matcher.content_types, &config.matcher.slug_field)
        .await?;
    let matcher = UrlMatcher::new(&config.matcher).context("compiling path prefix")?;
    Ok(matcher.match_urls(&urls, &SlugTable::from_documents(&documents)))
}

/// Blank lines and `#` comments are skipped.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Scheduler running the full pipeline on `GSC_SYNC_CRON`, or `None` when disabled.
pub async fn maybe_build_scheduler(config: &SyncConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = Arc::new(config.clone());
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let config = SyncConfig::clone(&job_config);
        Box::pin(async move {
            match pipeline_from_config(config).await {
                Ok(pipeline) => match pipeline.run_once().await {
                    Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                    Err(err) => error!(error = ?err, "scheduled sync failed"),
                },
                Err(err) => error!(error = ?err, "scheduled sync could not start"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_blank_lines_and_comments() {
        let urls = parse_url_list("# exported 2026-03-01\nhttps://example.com/a\n\n  https://example.com/b  \n");
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[tokio::test]
    async fn scheduler_is_not_built_when_disabled() {
        let config = SyncConfig::from_lookup(|_| None);
        assert!(maybe_build_scheduler(&config).await.expect("scheduler").is_none());
    }
}
