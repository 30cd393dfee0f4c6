//! One sync run: GSC rows into Postgres, URL matching against the CMS,
//! decay detection and the write-back of refresh tasks and snapshots.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use gsc_analysis::{
    detect_cannibalization, find_quick_wins, impact_candidates, measure_publishing_impact,
    plan_refresh_tasks, plan_snapshots, published_dates_by_page, DecayDetector, SlugTable,
    UrlMatcher,
};
use gsc_core::{
    CannibalizationReport, ContentDocument, DateWindow, DecaySignal, DocumentSource,
    InsightSink, MatchResult, MetricsSource, PageMetrics, PerformanceSnapshot, PublishingImpact,
    QueryPageMetrics, QuickWin, RefreshTask, SourceError,
};
use gsc_storage::{ApiClient, GscClient, PgStore, SanityClient, SyncRunRecord};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::report::{write_reports, RunReport, SyncRunSummary};
use crate::rules::InsightRules;

/// Sink used for dry runs: logs what would be written to the CMS.
#[derive(Default)]
pub struct DryRunSink;

#[async_trait]
impl InsightSink for DryRunSink {
    async fn create_refresh_tasks(&self, tasks: &[RefreshTask]) -> Result<usize, SourceError> {
        for task in tasks {
            info!(
                task_id = %task.id,
                document_id = %task.document_id,
                reason = task.reason.as_str(),
                severity = task.severity.as_str(),
                "dry run: refresh task not created"
            );
        }
        Ok(0)
    }

    async fn write_snapshots(&self, snapshots: &[PerformanceSnapshot]) -> Result<usize, SourceError> {
        info!(snapshots = snapshots.len(), "dry run: snapshots not written");
        Ok(0)
    }
}

/// Inputs to the analysis stage, already loaded from storage and the CMS.
pub struct AnalysisInput<'a> {
    pub site_url: &'a str,
    pub pages: &'a [String],
    pub documents: &'a [ContentDocument],
    pub snapshot_metrics: &'a [PageMetrics],
    pub query_metrics: &'a [QueryPageMetrics],
    pub snapshot_window: DateWindow,
    pub reference: NaiveDate,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Insights {
    pub matches: Vec<MatchResult>,
    pub signals: Vec<DecaySignal>,
    pub tasks: Vec<RefreshTask>,
    pub quick_wins: Vec<QuickWin>,
    pub cannibalization: Vec<CannibalizationReport>,
    pub publishing_impact: Vec<PublishingImpact>,
    pub snapshots: Vec<PerformanceSnapshot>,
}

/// Matching, decay detection and the derived reports for one site.
pub async fn analyze<S: MetricsSource>(
    metrics: S,
    matcher: &UrlMatcher,
    rules: &InsightRules,
    config: &SyncConfig,
    input: AnalysisInput<'_>,
) -> Result<Insights> {
    let table = SlugTable::from_documents(input.documents);
    let matches = matcher.match_urls(input.pages, &table);
    let matched = matches.iter().filter(|m| m.is_matched()).count();
    info!(
        pages = matches.len(),
        matched,
        unmatched = matches.len() - matched,
        slugs = table.len(),
        "matched GSC pages to documents"
    );

    let candidates = impact_candidates(&matches, input.documents);
    let publishing_impact = measure_publishing_impact(
        &metrics,
        input.site_url,
        &candidates,
        &rules.publishing_impact,
        input.reference,
    )
    .await?;

    let published = published_dates_by_page(&matches, input.documents);
    let detector = DecayDetector::new(metrics, rules.decay.clone())?;
    let signals = detector
        .detect_decay(
            input.site_url,
            &published,
            config.quiet_period,
            input.reference,
            input.now,
        )
        .await?;

    let tasks = plan_refresh_tasks(&signals, &matches, input.reference);
    let quick_wins = find_quick_wins(input.snapshot_metrics, &rules.quick_wins);
    let cannibalization = detect_cannibalization(input.query_metrics, &rules.cannibalization);
    let snapshots = plan_snapshots(&matches, input.snapshot_metrics, input.snapshot_window);

    Ok(Insights {
        matches,
        signals,
        tasks,
        quick_wins,
        cannibalization,
        publishing_impact,
        snapshots,
    })
}

pub struct SyncPipeline {
    config: SyncConfig,
    rules: InsightRules,
    matcher: UrlMatcher,
    gsc: GscClient,
    store: PgStore,
    documents: Box<dyn DocumentSource>,
    sink: Box<dyn InsightSink>,
}

impl SyncPipeline {
    pub async fn connect(config: SyncConfig, rules: InsightRules) -> Result<Self> {
        config.validate()?;
        let http = ApiClient::new(config.http_client_config())?;
        let gsc = GscClient::new(http.clone(), config.gsc_access_token.clone());
        let sanity = SanityClient::new(http, config.sanity.clone())?;
        let store = PgStore::connect(&config.database_url)
            .await
            .context("connecting to postgres")?;

        let sink: Box<dyn InsightSink> = if config.dry_run {
            Box::<DryRunSink>::default()
        } else {
            Box::new(sanity.clone())
        };
        Self::from_parts(config, rules, gsc, store, Box::new(sanity), sink)
    }

    pub fn from_parts(
        config: SyncConfig,
        rules: InsightRules,
        gsc: GscClient,
        store: PgStore,
        documents: Box<dyn DocumentSource>,
        sink: Box<dyn InsightSink>,
    ) -> Result<Self> {
        let matcher = UrlMatcher::new(&config.matcher).context("compiling path prefix")?;
        Ok(Self {
            config,
            rules,
            matcher,
            gsc,
            store,
            documents,
            sink,
        })
    }

    pub fn store(&self) -> &PgStore {
        &self.store
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let site_url = self.config.site_url.as_str();
        let reference = self.config.reference_date(started_at);
        let span = info_span!("sync_run", %run_id, site_url, %reference);

        async move {
            let lookback = DateWindow::ending_at(reference, self.config.lookback_days);
            let rows = self
                .gsc
                .fetch_rows(site_url, lookback)
                .await
                .context("fetching search analytics")?;
            let rows_upserted = self.store.upsert_rows(&rows).await?;
            info!(rows = rows.len(), rows_upserted, "search analytics synced");

            let pages = self.store.distinct_pages(site_url, lookback).await?;
            let documents = self
                .documents
                .fetch_documents(&self.config.matcher.content_types, &self.config.matcher.slug_field)
                .await
                .context("fetching CMS documents")?;

            let snapshot_window = DateWindow::ending_at(reference, self.config.snapshot_window_days);
            let snapshot_metrics = self.store.aggregate_pages(site_url, snapshot_window).await?;
            let query_metrics = self
                .store
                .query_page_metrics(site_url, snapshot_window, self.rules.cannibalization.max_position)
                .await?;

            let insights = analyze(
                self.store.clone(),
                &self.matcher,
                &self.rules,
                &self.config,
                AnalysisInput {
                    site_url,
                    pages: &pages,
                    documents: &documents,
                    snapshot_metrics: &snapshot_metrics,
                    query_metrics: &query_metrics,
                    snapshot_window,
                    reference,
                    now: started_at,
                },
            )
            .await?;

            let unmatched_pages = self
                .store
                .record_match_results(site_url, &insights.matches)
                .await?;

            let tasks_created = match self.sink.create_refresh_tasks(&insights.tasks).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, tasks = insights.tasks.len(), "creating refresh tasks failed");
                    0
                }
            };
            let snapshots_written = match self.sink.write_snapshots(&insights.snapshots).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, snapshots = insights.snapshots.len(), "writing snapshots failed");
                    0
                }
            };

            let mut summary = SyncRunSummary {
                run_id,
                site_url: site_url.to_string(),
                reference_date: reference,
                started_at,
                finished_at: Utc::now(),
                rows_fetched: rows.len(),
                rows_upserted,
                pages_seen: pages.len(),
                matched_pages: insights.matches.len() - unmatched_pages,
                unmatched_pages,
                signals: insights.signals.len(),
                quick_wins: insights.quick_wins.len(),
                cannibalized_queries: insights.cannibalization.len(),
                publishing_impacts: insights.publishing_impact.len(),
                tasks_created,
                snapshots_written,
                dry_run: self.config.dry_run,
                reports_dir: String::new(),
            };

            let reports_dir = {
                let report = RunReport::new(
                    &summary,
                    &insights.matches,
                    &insights.signals,
                    &insights.tasks,
                    &insights.quick_wins,
                    &insights.cannibalization,
                    &insights.publishing_impact,
                );
                write_reports(&self.config.workspace_root, &report).await?
            };
            summary.reports_dir = reports_dir.display().to_string();

            self.store
                .record_sync_run(&SyncRunRecord {
                    run_id,
                    site_url: summary.site_url.clone(),
                    started_at,
                    finished_at: summary.finished_at,
                    rows_synced: i64::try_from(summary.rows_fetched).unwrap_or(i64::MAX),
                    signals: i32::try_from(summary.signals).unwrap_or(i32::MAX),
                    tasks_created: i32::try_from(summary.tasks_created).unwrap_or(i32::MAX),
                    summary_json: serde_json::to_value(&summary)?,
                })
                .await?;

            info!(
                signals = summary.signals,
                tasks_created,
                unmatched_pages,
                reports_dir = %summary.reports_dir,
                "sync run complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Decay signals only, read from already-synced metrics.
    pub async fn detect_only(&self) -> Result<Vec<DecaySignal>> {
        let now = Utc::now();
        let reference = self.config.reference_date(now);
        let site_url = self.config.site_url.as_str();
        let lookback = DateWindow::ending_at(reference, self.config.lookback_days);

        let pages = self.store.distinct_pages(site_url, lookback).await?;
        let documents = self
            .documents
            .fetch_documents(&self.config.matcher.content_types, &self.config.matcher.slug_field)
            .await?;
        let matches = self
            .matcher
            .match_urls(&pages, &SlugTable::from_documents(&documents));
        let published: HashMap<String, DateTime<Utc>> = published_dates_by_page(&matches, &documents);

        let detector = DecayDetector::new(self.store.clone(), self.rules.decay.clone())?;
        Ok(detector
            .detect_decay(site_url, &published, self.config.quiet_period, reference, now)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gsc_core::{DecayRuleKind, ImpactVerdict, MatchConfidence, Severity, UnmatchReason};

    struct FixedMetrics {
        current: Vec<PageMetrics>,
        previous: Vec<PageMetrics>,
        current_end: NaiveDate,
    }

    #[async_trait]
    impl MetricsSource for FixedMetrics {
        async fn page_metrics(
            &self,
            _site_url: &str,
            window: DateWindow,
        ) -> Result<Vec<PageMetrics>, SourceError> {
            if window.end == self.current_end {
                Ok(self.current.clone())
            } else {
                Ok(self.previous.clone())
            }
        }
    }

    fn page(url: &str, position: f64, ctr: f64, impressions: i64) -> PageMetrics {
        PageMetrics {
            page: url.into(),
            clicks: (ctr * impressions as f64).round() as i64,
            impressions,
            ctr,
            position,
        }
    }

    fn doc(id: &str, slug: &str, published: DateTime<Utc>) -> ContentDocument {
        ContentDocument {
            id: id.into(),
            content_type: "post".into(),
            slug: Some(slug.into()),
            created_at: Some(published),
            published_at: Some(published),
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::from_lookup(|key| match key {
            "GSC_SITE_URL" => Some("sc-domain:example.com".to_string()),
            "GSC_PATH_PREFIX" => Some("/blog".to_string()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn analyze_matches_pages_and_plans_tasks_for_decaying_documents() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).single().unwrap();
        let reference = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let old = now - chrono::Duration::days(400);
        let fresh = now - chrono::Duration::days(30);

        let config = config();
        let rules = InsightRules::default();
        let matcher = UrlMatcher::new(&config.matcher).expect("matcher");

        let pages = vec![
            "https://www.example.com/blog/slipping-post".to_string(),
            "https://example.com/blog/new-post/".to_string(),
            "https://example.com/about".to_string(),
        ];
        let documents = vec![
            doc("doc-1", "slipping-post", old),
            doc("doc-2", "new-post/", fresh),
        ];
        let metrics = FixedMetrics {
            current: vec![
                page(&pages[0], 12.0, 0.03, 800),
                page(&pages[1], 12.0, 0.01, 800),
            ],
            previous: vec![
                page(&pages[0], 3.0, 0.03, 800),
                page(&pages[1], 3.0, 0.05, 800),
            ],
            current_end: reference,
        };
        let snapshot_metrics = vec![page(&pages[0], 12.0, 0.03, 800)];
        let snapshot_window = DateWindow::ending_at(reference, 28);

        let insights = analyze(
            metrics,
            &matcher,
            &rules,
            &config,
            AnalysisInput {
                site_url: &config.site_url,
                pages: &pages,
                documents: &documents,
                snapshot_metrics: &snapshot_metrics,
                query_metrics: &[],
                snapshot_window,
                reference,
                now,
            },
        )
        .await
        .expect("analyze");

        assert_eq!(insights.matches.len(), 3);
        assert_eq!(insights.matches[0].confidence, MatchConfidence::Exact);
        assert_eq!(insights.matches[1].confidence, MatchConfidence::Normalized);
        assert_eq!(
            insights.matches[2].unmatch_reason,
            UnmatchReason::OutsidePathPrefix
        );

        // doc-2 was published inside the quiet period.
        assert_eq!(insights.signals.len(), 1);
        let signal = &insights.signals[0];
        assert_eq!(signal.page, pages[0]);
        assert_eq!(signal.reason, DecayRuleKind::PositionDecay);
        assert_eq!(signal.severity, Severity::High);

        assert_eq!(insights.tasks.len(), 1);
        assert_eq!(insights.tasks[0].document_id, "doc-1");
        assert_eq!(insights.tasks[0].detected_on, reference);

        assert_eq!(insights.snapshots.len(), 1);
        assert_eq!(insights.snapshots[0].document_id, "doc-1");
        assert_eq!(insights.snapshots[0].window, snapshot_window);

        // doc-2's 28-day after window closes on the reference date; doc-1 is too old.
        assert_eq!(insights.publishing_impact.len(), 1);
        let impact = &insights.publishing_impact[0];
        assert_eq!(impact.document_id, "doc-2");
        assert_eq!(impact.after_window.end, reference);
        assert_eq!(impact.verdict, ImpactVerdict::Declined);
    }

    #[tokio::test]
    async fn dry_run_sink_writes_nothing() {
        let sink = DryRunSink;
        assert_eq!(sink.write_snapshots(&[]).await.expect("snapshots"), 0);
        assert_eq!(sink.create_refresh_tasks(&[]).await.expect("tasks"), 0);
    }
}
