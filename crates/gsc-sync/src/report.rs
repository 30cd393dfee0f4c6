//! Per-run report files under `<workspace>/reports/<run_id>/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use gsc_core::{
    CannibalizationReport, DecaySignal, MatchResult, PublishingImpact, QuickWin, RefreshTask,
};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

const REPORT_LIST_LIMIT: usize = 25;

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub site_url: String,
    pub reference_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_fetched: usize,
    pub rows_upserted: u64,
    pub pages_seen: usize,
    pub matched_pages: usize,
    pub unmatched_pages: usize,
    pub signals: usize,
    pub quick_wins: usize,
    pub cannibalized_queries: usize,
    pub publishing_impacts: usize,
    pub tasks_created: usize,
    pub snapshots_written: usize,
    pub dry_run: bool,
    pub reports_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub summary: &'a SyncRunSummary,
    pub unmatched_by_reason: BTreeMap<&'static str, usize>,
    pub unmatched: Vec<&'a MatchResult>,
    pub signals: &'a [DecaySignal],
    pub tasks: &'a [RefreshTask],
    pub quick_wins: &'a [QuickWin],
    pub cannibalization: &'a [CannibalizationReport],
    pub publishing_impact: &'a [PublishingImpact],
}

impl<'a> RunReport<'a> {
    pub fn new(
        summary: &'a SyncRunSummary,
        matches: &'a [MatchResult],
        signals: &'a [DecaySignal],
        tasks: &'a [RefreshTask],
        quick_wins: &'a [QuickWin],
        cannibalization: &'a [CannibalizationReport],
        publishing_impact: &'a [PublishingImpact],
    ) -> Self {
        let unmatched = matches.iter().filter(|m| !m.is_matched()).collect::<Vec<_>>();
        let mut unmatched_by_reason = BTreeMap::new();
        for m in &unmatched {
            *unmatched_by_reason.entry(m.unmatch_reason.as_str()).or_default() += 1;
        }
        Self {
            summary,
            unmatched_by_reason,
            unmatched,
            signals,
            tasks,
            quick_wins: &quick_wins[..quick_wins.len().min(REPORT_LIST_LIMIT)],
            cannibalization: &cannibalization[..cannibalization.len().min(REPORT_LIST_LIMIT)],
            publishing_impact: &publishing_impact
                [..publishing_impact.len().min(REPORT_LIST_LIMIT)],
        }
    }

    pub fn daily_brief(&self) -> String {
        let s = self.summary;
        let mut lines = vec![
            "# GSC Insights Daily Brief".to_string(),
            String::new(),
            format!("- Run ID: `{}`", s.run_id),
            format!("- Site: {}", s.site_url),
            format!("- Reference date: {}", s.reference_date),
            format!("- Rows synced: {} ({} upserted)", s.rows_fetched, s.rows_upserted),
            format!("- Pages: {} matched, {} unmatched", s.matched_pages, s.unmatched_pages),
            format!("- Decay signals: {} ({} tasks created)", s.signals, s.tasks_created),
        ];
        if s.dry_run {
            lines.push("- Dry run: CMS writes skipped".to_string());
        }

        lines.push(String::new());
        lines.push("## Unmatched URLs".to_string());
        if self.unmatched_by_reason.is_empty() {
            lines.push("- none".to_string());
        }
        for (reason, count) in &self.unmatched_by_reason {
            lines.push(format!("- {reason}: {count}"));
        }

        lines.push(String::new());
        lines.push("## Decay".to_string());
        for signal in self.signals {
            lines.push(format!(
                "- [{}] {}: {}",
                signal.severity.as_str(),
                signal.page,
                signal.reason.as_str()
            ));
        }

        lines.push(String::new());
        lines.push("## Quick Wins".to_string());
        for win in self.quick_wins {
            lines.push(format!(
                "- {} (pos {:.1}, {} impressions, +{:.0} clicks)",
                win.page, win.position, win.impressions, win.estimated_click_upside
            ));
        }

        lines.push(String::new());
        lines.push("## Cannibalization".to_string());
        for report in self.cannibalization {
            lines.push(format!("- \"{}\": {} pages", report.query, report.pages.len()));
        }

        lines.push(String::new());
        lines.push("## Publishing Impact".to_string());
        for impact in self.publishing_impact {
            let before = impact.before.as_ref().map_or(0, |m| m.clicks);
            lines.push(format!(
                "- [{}] {} (published {}): {} -> {} clicks",
                impact.verdict.as_str(),
                impact.page,
                impact.published_on,
                before,
                impact.after.clicks
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

pub fn reports_dir_for(workspace_root: &Path, run_id: Uuid) -> PathBuf {
    workspace_root.join("reports").join(run_id.to_string())
}

pub async fn write_reports(workspace_root: &Path, report: &RunReport<'_>) -> Result<PathBuf> {
    let reports_dir = reports_dir_for(workspace_root, report.summary.run_id);
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(reports_dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;
    fs::write(reports_dir.join("daily_brief.md"), report.daily_brief())
        .await
        .context("writing daily_brief.md")?;

    Ok(reports_dir)
}

/// Markdown index of the most recent `runs` report directories.
pub fn report_daily_markdown(runs: usize, workspace_root: &Path) -> Result<String> {
    let reports_root = workspace_root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# GSC Insights Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let summary_path = dir.path().join("summary.json");
        let Ok(text) = std::fs::read_to_string(&summary_path) else {
            continue;
        };
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", summary_path.display()))?;
        let summary = &value["summary"];
        let field = |key: &str| summary.get(key).and_then(|v| v.as_u64()).unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!(
            "- reference date: {}",
            summary
                .get("reference_date")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        ));
        lines.push(format!("- signals: {}", field("signals")));
        lines.push(format!("- tasks created: {}", field("tasks_created")));
        lines.push(format!("- unmatched pages: {}", field("unmatched_pages")));
        lines.push(format!("- summary: `{}`", summary_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsc_core::{
        DateWindow, DecayMetrics, DecayRuleKind, ImpactVerdict, MatchConfidence, MatchDiagnostics,
        PageMetrics, Severity, UnmatchReason,
    };
    use tempfile::tempdir;

    fn summary(run_id: Uuid) -> SyncRunSummary {
        let at = DateTime::parse_from_rfc3339("2026-03-10T06:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        SyncRunSummary {
            run_id,
            site_url: "sc-domain:example.com".into(),
            reference_date: NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(),
            started_at: at,
            finished_at: at,
            rows_fetched: 10,
            rows_upserted: 10,
            pages_seen: 2,
            matched_pages: 1,
            unmatched_pages: 1,
            signals: 1,
            quick_wins: 0,
            cannibalized_queries: 0,
            publishing_impacts: 1,
            tasks_created: 1,
            snapshots_written: 1,
            dry_run: true,
            reports_dir: String::new(),
        }
    }

    fn unmatched() -> MatchResult {
        MatchResult {
            gsc_url: "https://example.com/old-post".into(),
            sanity_id: None,
            confidence: MatchConfidence::None,
            matched_slug: None,
            unmatch_reason: UnmatchReason::NoMatchingDocument,
            extracted_slug: Some("old-post".into()),
            diagnostics: Some(MatchDiagnostics {
                normalized_url: "https://example.com/old-post".into(),
                path_after_prefix: Some("/old-post".into()),
                configured_prefix: None,
                available_slugs_count: 4,
                similar_slugs: vec!["old-posts".into()],
            }),
        }
    }

    fn signal() -> DecaySignal {
        DecaySignal {
            page: "https://example.com/a".into(),
            reason: DecayRuleKind::ImpressionsDrop,
            severity: Severity::High,
            metrics: DecayMetrics {
                position_before: 3.0,
                position_now: 3.5,
                position_delta: 0.5,
                ctr_before: 0.05,
                ctr_now: 0.05,
                impressions: 700,
            },
        }
    }

    fn impact() -> PublishingImpact {
        let published_on = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        PublishingImpact {
            document_id: "doc-9".into(),
            page: "https://example.com/launch".into(),
            published_on,
            before_window: DateWindow::ending_at(published_on - chrono::Duration::days(1), 28),
            after_window: DateWindow::new(published_on, published_on + chrono::Duration::days(27)),
            before: Some(PageMetrics {
                page: "https://example.com/launch".into(),
                clicks: 0,
                impressions: 120,
                ctr: 0.0,
                position: 30.0,
            }),
            after: PageMetrics {
                page: "https://example.com/launch".into(),
                clicks: 42,
                impressions: 2100,
                ctr: 0.02,
                position: 9.0,
            },
            clicks_change: None,
            verdict: ImpactVerdict::Improved,
        }
    }

    #[test]
    fn brief_lists_unmatched_reasons_and_signals() {
        let s = summary(Uuid::new_v4());
        let matches = vec![unmatched()];
        let signals = vec![signal()];
        let impacts = vec![impact()];
        let report = RunReport::new(&s, &matches, &signals, &[], &[], &[], &impacts);
        assert_eq!(report.unmatched_by_reason["no_matching_document"], 1);

        let brief = report.daily_brief();
        assert!(brief.contains("no_matching_document: 1"));
        assert!(brief.contains("[high] https://example.com/a"));
        assert!(brief.contains("[improved] https://example.com/launch (published 2026-01-10): 0 -> 42 clicks"));
        assert!(brief.contains("Dry run"));
    }

    #[tokio::test]
    async fn reports_are_written_and_indexed() {
        let dir = tempdir().expect("tempdir");
        let run_id = Uuid::new_v4();
        let s = summary(run_id);
        let matches = vec![unmatched()];
        let signals = vec![signal()];
        let report = RunReport::new(&s, &matches, &signals, &[], &[], &[], &[]);

        let written = write_reports(dir.path(), &report).await.expect("write reports");
        assert_eq!(written, reports_dir_for(dir.path(), run_id));
        assert!(written.join("summary.json").exists());
        assert!(written.join("daily_brief.md").exists());

        let index = report_daily_markdown(5, dir.path()).expect("index");
        assert!(index.contains(&run_id.to_string()));
        assert!(index.contains("signals: 1"));
        assert!(index.contains("reference date: 2026-03-07"));
    }
}
