//! Core domain model and collaborator contracts for the GSC insights sync.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "gsc-core";

/// One Search Analytics row as reported by GSC for the `[page, query, date]` dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnalyticsRow {
    pub site_url: String,
    pub page: String,
    pub query: String,
    pub date: NaiveDate,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// Inclusive date range used for metric aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at (and including) `end`.
    pub fn ending_at(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    /// The `days` days immediately before this window.
    pub fn preceding(&self, days: u32) -> Self {
        Self::ending_at(self.start - Duration::days(1), days)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Aggregate metrics for one page over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    pub page: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// Per-(query, page) aggregate used for cannibalization grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPageMetrics {
    pub query: String,
    pub page: String,
    pub clicks: i64,
    pub impressions: i64,
    pub position: f64,
}

/// CMS document as returned by the document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    pub id: String,
    pub content_type: String,
    pub slug: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl ContentDocument {
    /// Publication date used for quiet-period checks; falls back to creation time.
    pub fn effective_published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMatcherConfig {
    pub content_types: Vec<String>,
    pub slug_field: String,
    pub path_prefix: Option<String>,
    pub base_url: Option<String>,
}

impl Default for UrlMatcherConfig {
    fn default() -> Self {
        Self {
            content_types: vec!["post".to_string(), "page".to_string()],
            slug_field: "slug".to_string(),
            path_prefix: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Exact,
    Normalized,
    /// Reserved; suggestions are never auto-accepted as matches.
    Fuzzy,
    None,
}

impl MatchConfidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchReason {
    Matched,
    NoSlugExtracted,
    NoMatchingDocument,
    OutsidePathPrefix,
}

impl UnmatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::NoSlugExtracted => "no_slug_extracted",
            Self::NoMatchingDocument => "no_matching_document",
            Self::OutsidePathPrefix => "outside_path_prefix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDiagnostics {
    pub normalized_url: String,
    pub path_after_prefix: Option<String>,
    pub configured_prefix: Option<String>,
    pub available_slugs_count: usize,
    pub similar_slugs: Vec<String>,
}

/// Outcome of matching one reported URL against the slug table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub gsc_url: String,
    pub sanity_id: Option<String>,
    pub confidence: MatchConfidence,
    pub matched_slug: Option<String>,
    pub unmatch_reason: UnmatchReason,
    pub extracted_slug: Option<String>,
    pub diagnostics: Option<MatchDiagnostics>,
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        self.sanity_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayRuleKind {
    PositionDecay,
    LowCtr,
    ImpressionsDrop,
}

impl DecayRuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PositionDecay => "position_decay",
            Self::LowCtr => "low_ctr",
            Self::ImpressionsDrop => "impressions_drop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayRule {
    #[serde(rename = "type")]
    pub kind: DecayRuleKind,
    pub threshold: f64,
    pub min_impressions: i64,
    pub comparison_window_days: u32,
    pub sustained_days: u32,
}

impl DecayRule {
    pub fn defaults() -> Vec<DecayRule> {
        vec![
            DecayRule {
                kind: DecayRuleKind::PositionDecay,
                threshold: 3.0,
                min_impressions: 100,
                comparison_window_days: 28,
                sustained_days: 14,
            },
            DecayRule {
                kind: DecayRuleKind::LowCtr,
                threshold: 0.01,
                min_impressions: 1000,
                comparison_window_days: 28,
                sustained_days: 7,
            },
            DecayRule {
                kind: DecayRuleKind::ImpressionsDrop,
                threshold: 0.5,
                min_impressions: 500,
                comparison_window_days: 28,
                sustained_days: 14,
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietPeriodConfig {
    pub enabled: bool,
    pub days: u32,
}

impl Default for QuietPeriodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 45,
        }
    }
}

impl QuietPeriodConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            days: 0,
        }
    }

    /// True when a page published at `published_at` is still inside the quiet period at `now`.
    pub fn suppresses(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.enabled && now.signed_duration_since(published_at) < Duration::days(i64::from(self.days))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayMetrics {
    pub position_before: f64,
    pub position_now: f64,
    pub position_delta: f64,
    pub ctr_before: f64,
    pub ctr_now: f64,
    pub impressions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecaySignal {
    pub page: String,
    pub reason: DecayRuleKind,
    pub severity: Severity,
    pub metrics: DecayMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickWin {
    pub page: String,
    pub position: f64,
    pub ctr: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub estimated_click_upside: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannibalizationReport {
    pub query: String,
    pub pages: Vec<QueryPageMetrics>,
    pub total_impressions: i64,
}

/// Editor-facing task created in the CMS for a decaying document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTask {
    pub id: Uuid,
    pub document_id: String,
    pub page: String,
    pub reason: DecayRuleKind,
    pub severity: Severity,
    pub summary: String,
    pub metrics: DecayMetrics,
    pub detected_on: NaiveDate,
}

/// Rolling performance figures written back onto a matched CMS document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub document_id: String,
    pub page: String,
    pub window: DateWindow,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactVerdict {
    Improved,
    Declined,
    Flat,
    /// The page had no traffic before publication.
    New,
}

impl ImpactVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improved => "improved",
            Self::Declined => "declined",
            Self::Flat => "flat",
            Self::New => "new",
        }
    }
}

/// Page performance in equal-length windows either side of a document's publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishingImpact {
    pub document_id: String,
    pub page: String,
    pub published_on: NaiveDate,
    pub before_window: DateWindow,
    pub after_window: DateWindow,
    pub before: Option<PageMetrics>,
    pub after: PageMetrics,
    /// Relative click change; `None` without clicks before publication.
    pub clicks_change: Option<f64>,
    pub verdict: ImpactVerdict,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Supplies per-page aggregates for a closed date range.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn page_metrics(
        &self,
        site_url: &str,
        window: DateWindow,
    ) -> Result<Vec<PageMetrics>, SourceError>;
}

/// Supplies CMS documents of the configured content types.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_documents(
        &self,
        content_types: &[String],
        slug_field: &str,
    ) -> Result<Vec<ContentDocument>, SourceError>;
}

/// Receives refresh tasks and performance snapshots.
#[async_trait]
pub trait InsightSink: Send + Sync {
    async fn create_refresh_tasks(&self, tasks: &[RefreshTask]) -> Result<usize, SourceError>;

    async fn write_snapshots(&self, snapshots: &[PerformanceSnapshot]) -> Result<usize, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn windows_are_inclusive_and_adjacent() {
        let current = DateWindow::ending_at(day(2026, 3, 14), 14);
        assert_eq!(current.start, day(2026, 3, 1));
        assert_eq!(current.days(), 14);

        let previous = current.preceding(28);
        assert_eq!(previous.end, day(2026, 2, 28));
        assert_eq!(previous.days(), 28);
    }

    #[test]
    fn quiet_period_only_suppresses_recent_pages() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let quiet = QuietPeriodConfig { enabled: true, days: 45 };
        assert!(quiet.suppresses(now - Duration::days(5), now));
        assert!(!quiet.suppresses(now - Duration::days(60), now));
        assert!(!QuietPeriodConfig::disabled().suppresses(now - Duration::days(5), now));
    }

    #[test]
    fn severity_orders_by_rank() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.rank(), 3);
    }

    #[test]
    fn decay_rule_serializes_kind_as_type() {
        let rule = &DecayRule::defaults()[1];
        let json = serde_json::to_value(rule).unwrap();
        assert_eq!(json["type"], "low_ctr");
        assert_eq!(json["min_impressions"], 1000);
    }
}
