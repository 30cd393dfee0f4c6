//! Turns signals and match results into CMS-bound records.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use gsc_core::{
    ContentDocument, DateWindow, DecayRuleKind, DecaySignal, MatchResult, PageMetrics,
    PerformanceSnapshot, RefreshTask,
};
use tracing::warn;
use uuid::Uuid;

/// Deterministic per (document, reason, day) so reruns upsert instead of duplicating.
pub fn refresh_task_id(document_id: &str, reason: DecayRuleKind, detected_on: NaiveDate) -> Uuid {
    let key = format!("{document_id}:{}:{detected_on}", reason.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

fn summarize(signal: &DecaySignal) -> String {
    let m = &signal.metrics;
    match signal.reason {
        DecayRuleKind::PositionDecay => format!(
            "Average position slipped from {:.1} to {:.1} ({:+.1}).",
            m.position_before, m.position_now, m.position_delta
        ),
        DecayRuleKind::LowCtr => format!(
            "CTR is {:.2}% at position {:.1} across {} impressions.",
            m.ctr_now * 100.0,
            m.position_now,
            m.impressions
        ),
        DecayRuleKind::ImpressionsDrop => format!(
            "Impressions fell to {} while position moved {:.1} -> {:.1}.",
            m.impressions, m.position_before, m.position_now
        ),
    }
}

fn document_by_page(matches: &[MatchResult]) -> HashMap<&str, &str> {
    matches
        .iter()
        .filter_map(|m| Some((m.gsc_url.as_str(), m.sanity_id.as_deref()?)))
        .collect()
}

/// Signals for pages without a matched document are dropped with a warning.
pub fn plan_refresh_tasks(
    signals: &[DecaySignal],
    matches: &[MatchResult],
    detected_on: NaiveDate,
) -> Vec<RefreshTask> {
    let documents = document_by_page(matches);
    signals
        .iter()
        .filter_map(|signal| {
            let Some(document_id) = documents.get(signal.page.as_str()) else {
                warn!(page = %signal.page, reason = signal.reason.as_str(), "decay signal for unmatched page");
                return None;
            };
            Some(RefreshTask {
                id: refresh_task_id(document_id, signal.reason, detected_on),
                document_id: document_id.to_string(),
                page: signal.page.clone(),
                reason: signal.reason,
                severity: signal.severity,
                summary: summarize(signal),
                metrics: signal.metrics.clone(),
                detected_on,
            })
        })
        .collect()
}

/// Publication dates keyed by reported page URL, for quiet-period checks.
pub fn published_dates_by_page(
    matches: &[MatchResult],
    documents: &[ContentDocument],
) -> HashMap<String, DateTime<Utc>> {
    let by_id = documents
        .iter()
        .filter_map(|d| Some((d.id.as_str(), d.effective_published_at()?)))
        .collect::<HashMap<_, _>>();
    matches
        .iter()
        .filter_map(|m| {
            let published = by_id.get(m.sanity_id.as_deref()?)?;
            Some((m.gsc_url.clone(), *published))
        })
        .collect()
}

pub fn plan_snapshots(
    matches: &[MatchResult],
    metrics: &[PageMetrics],
    window: DateWindow,
) -> Vec<PerformanceSnapshot> {
    let documents = document_by_page(matches);
    metrics
        .iter()
        .filter_map(|m| {
            let document_id = documents.get(m.page.as_str())?;
            Some(PerformanceSnapshot {
                document_id: document_id.to_string(),
                page: m.page.clone(),
                window,
                clicks: m.clicks,
                impressions: m.impressions,
                ctr: m.ctr,
                position: m.position,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gsc_core::{DecayMetrics, MatchConfidence, Severity, UnmatchReason};

    fn matched(url: &str, id: &str) -> MatchResult {
        MatchResult {
            gsc_url: url.into(),
            sanity_id: Some(id.into()),
            confidence: MatchConfidence::Exact,
            matched_slug: None,
            unmatch_reason: UnmatchReason::Matched,
            extracted_slug: None,
            diagnostics: None,
        }
    }

    fn signal(page: &str) -> DecaySignal {
        DecaySignal {
            page: page.into(),
            reason: DecayRuleKind::PositionDecay,
            severity: Severity::Medium,
            metrics: DecayMetrics {
                position_before: 4.0,
                position_now: 9.5,
                position_delta: 5.5,
                ctr_before: 0.04,
                ctr_now: 0.02,
                impressions: 1200,
            },
        }
    }

    #[test]
    fn tasks_only_for_matched_pages_with_stable_ids() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let matches = vec![matched("https://x.com/a", "doc-a")];
        let tasks = plan_refresh_tasks(&[signal("https://x.com/a"), signal("https://x.com/b")], &matches, day);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].document_id, "doc-a");
        assert!(tasks[0].summary.contains("4.0 to 9.5"));

        let again = plan_refresh_tasks(&[signal("https://x.com/a")], &matches, day);
        assert_eq!(tasks[0].id, again[0].id);
        let next_day = plan_refresh_tasks(&[signal("https://x.com/a")], &matches, day.succ_opt().unwrap());
        assert_ne!(tasks[0].id, next_day[0].id);
    }

    #[test]
    fn published_dates_prefer_publication_over_creation() {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
        let published = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let docs = vec![
            ContentDocument {
                id: "doc-a".into(),
                content_type: "post".into(),
                slug: Some("a".into()),
                created_at: Some(created),
                published_at: Some(published),
            },
            ContentDocument {
                id: "doc-b".into(),
                content_type: "page".into(),
                slug: Some("b".into()),
                created_at: Some(created),
                published_at: None,
            },
        ];
        let matches = vec![matched("https://x.com/a", "doc-a"), matched("https://x.com/b", "doc-b")];
        let dates = published_dates_by_page(&matches, &docs);
        assert_eq!(dates["https://x.com/a"], published);
        assert_eq!(dates["https://x.com/b"], created);
    }
}
