//! Before/after page performance around a document's publication date.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use gsc_core::{
    ContentDocument, DateWindow, ImpactVerdict, MatchResult, MetricsSource, PageMetrics,
    PublishingImpact, SourceError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublishingImpactConfig {
    /// Length of each side of the comparison.
    pub window_days: u32,
    /// Publications older than this are no longer measured.
    pub max_age_days: u32,
    pub min_impressions: i64,
    /// Relative click change needed for an improved or declined verdict.
    pub change_threshold: f64,
}

impl Default for PublishingImpactConfig {
    fn default() -> Self {
        Self {
            window_days: 28,
            max_age_days: 90,
            min_impressions: 50,
            change_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactCandidate {
    pub document_id: String,
    pub page: String,
    pub published_on: NaiveDate,
}

/// Matched pages whose document carries a publication date.
pub fn impact_candidates(
    matches: &[MatchResult],
    documents: &[ContentDocument],
) -> Vec<ImpactCandidate> {
    let by_id = documents
        .iter()
        .filter_map(|d| Some((d.id.as_str(), d.effective_published_at()?)))
        .collect::<HashMap<_, _>>();
    matches
        .iter()
        .filter_map(|m| {
            let document_id = m.sanity_id.as_deref()?;
            let published = by_id.get(document_id)?;
            Some(ImpactCandidate {
                document_id: document_id.to_string(),
                page: m.gsc_url.clone(),
                published_on: published.date_naive(),
            })
        })
        .collect()
}

/// `before` ends the day before publication and `after` starts on it; both span `window_days`.
pub fn impact_windows(published_on: NaiveDate, window_days: u32) -> (DateWindow, DateWindow) {
    let span = i64::from(window_days.max(1)) - 1;
    let after = DateWindow::new(published_on, published_on + Duration::days(span));
    (after.preceding(window_days), after)
}

/// The after window has closed by `reference` and the publication is within `max_age_days`.
pub fn is_measurable(
    published_on: NaiveDate,
    config: &PublishingImpactConfig,
    reference: NaiveDate,
) -> bool {
    let (_, after) = impact_windows(published_on, config.window_days);
    after.end <= reference
        && (reference - published_on).num_days() <= i64::from(config.max_age_days)
}

pub fn classify_impact(
    candidate: &ImpactCandidate,
    before: Option<&PageMetrics>,
    after: &PageMetrics,
    config: &PublishingImpactConfig,
) -> Option<PublishingImpact> {
    if after.impressions < config.min_impressions {
        return None;
    }

    let clicks_change = before
        .filter(|b| b.clicks > 0)
        .map(|b| (after.clicks - b.clicks) as f64 / b.clicks as f64);
    let verdict = match (before, clicks_change) {
        (None, _) => ImpactVerdict::New,
        (Some(_), Some(change)) if change >= config.change_threshold => ImpactVerdict::Improved,
        (Some(_), Some(change)) if change <= -config.change_threshold => ImpactVerdict::Declined,
        (Some(_), None) if after.clicks > 0 => ImpactVerdict::Improved,
        _ => ImpactVerdict::Flat,
    };

    let (before_window, after_window) = impact_windows(candidate.published_on, config.window_days);
    Some(PublishingImpact {
        document_id: candidate.document_id.clone(),
        page: candidate.page.clone(),
        published_on: candidate.published_on,
        before_window,
        after_window,
        before: before.cloned(),
        after: after.clone(),
        clicks_change,
        verdict,
    })
}

/// Fetches both windows once per publication day and classifies every measurable candidate.
///
/// Candidates without metrics in the after window are skipped.
pub async fn measure_publishing_impact<S: MetricsSource + ?Sized>(
    source: &S,
    site_url: &str,
    candidates: &[ImpactCandidate],
    config: &PublishingImpactConfig,
    reference: NaiveDate,
) -> Result<Vec<PublishingImpact>, SourceError> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&ImpactCandidate>> = BTreeMap::new();
    for candidate in candidates
        .iter()
        .filter(|c| is_measurable(c.published_on, config, reference))
    {
        by_day.entry(candidate.published_on).or_default().push(candidate);
    }

    let mut impacts = Vec::new();
    for (published_on, group) in by_day {
        let (before_window, after_window) = impact_windows(published_on, config.window_days);
        let span = info_span!("publishing_impact", %published_on, site_url);
        let (before, after) = async {
            tokio::try_join!(
                source.page_metrics(site_url, before_window),
                source.page_metrics(site_url, after_window),
            )
        }
        .instrument(span)
        .await?;

        let before_by_page = before
            .iter()
            .map(|m| (m.page.as_str(), m))
            .collect::<HashMap<_, _>>();
        let after_by_page = after
            .iter()
            .map(|m| (m.page.as_str(), m))
            .collect::<HashMap<_, _>>();
        for candidate in group {
            let Some(after_metrics) = after_by_page.get(candidate.page.as_str()) else {
                continue;
            };
            let before_metrics = before_by_page.get(candidate.page.as_str()).copied();
            impacts.extend(classify_impact(candidate, before_metrics, after_metrics, config));
        }
    }

    debug!(
        candidates = candidates.len(),
        measured = impacts.len(),
        "measured publishing impact"
    );
    Ok(impacts)
}
