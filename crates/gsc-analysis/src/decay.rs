//! Threshold rules over comparable metric windows.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use gsc_core::{
    DateWindow, DecayMetrics, DecayRule, DecayRuleKind, DecaySignal, MetricsSource, PageMetrics,
    QuietPeriodConfig, Severity, SourceError,
};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const POSITION_CUTPOINTS: [f64; 3] = [3.0, 5.0, 8.0];
pub const CTR_CUTPOINTS: [f64; 3] = [0.005, 0.01, 0.02];
pub const IMPRESSIONS_DROP_CUTPOINTS: [f64; 3] = [0.3, 0.5, 0.7];

/// Positions worse than this are not considered for CTR anomalies.
const LOW_CTR_MAX_POSITION: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("rule {kind} has a non-finite or negative threshold: {threshold}")]
    InvalidThreshold { kind: &'static str, threshold: f64 },
    #[error("rule {kind} has a negative min_impressions: {value}")]
    InvalidMinImpressions { kind: &'static str, value: i64 },
    #[error("rule {kind} needs non-zero windows (comparison {comparison}, sustained {sustained})")]
    EmptyWindow {
        kind: &'static str,
        comparison: u32,
        sustained: u32,
    },
}

pub fn validate_rules(rules: &[DecayRule]) -> Result<(), RuleError> {
    for rule in rules {
        let kind = rule.kind.as_str();
        if !rule.threshold.is_finite() || rule.threshold < 0.0 {
            return Err(RuleError::InvalidThreshold {
                kind,
                threshold: rule.threshold,
            });
        }
        if rule.min_impressions < 0 {
            return Err(RuleError::InvalidMinImpressions {
                kind,
                value: rule.min_impressions,
            });
        }
        if rule.comparison_window_days == 0 || rule.sustained_days == 0 {
            return Err(RuleError::EmptyWindow {
                kind,
                comparison: rule.comparison_window_days,
                sustained: rule.sustained_days,
            });
        }
    }
    Ok(())
}

/// Values under the lowest cut point still bucket as `Low`.
pub fn bucket_severity(value: f64, cutpoints: [f64; 3]) -> Severity {
    if value >= cutpoints[2] {
        Severity::High
    } else if value >= cutpoints[1] {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Current window covers `sustained_days` ending at `reference`; the comparison
/// window is the `comparison_window_days` right before it. The two lengths may
/// differ, so impression sums are compared per day.
pub fn rule_windows(rule: &DecayRule, reference: NaiveDate) -> (DateWindow, DateWindow) {
    let current = DateWindow::ending_at(reference, rule.sustained_days);
    let previous = current.preceding(rule.comparison_window_days);
    (current, previous)
}

fn daily_rate(impressions: i64, days: u32) -> f64 {
    impressions as f64 / f64::from(days.max(1))
}

/// Evaluates the rule condition for one page with both windows present.
///
/// `current` sums over `sustained_days` and `previous` over `comparison_window_days`,
/// matching [`rule_windows`].
pub fn evaluate_rule(
    rule: &DecayRule,
    current: &PageMetrics,
    previous: &PageMetrics,
) -> Option<DecaySignal> {
    let severity = match rule.kind {
        DecayRuleKind::PositionDecay => {
            let delta = current.position - previous.position;
            (delta >= rule.threshold).then(|| bucket_severity(delta, POSITION_CUTPOINTS))
        }
        DecayRuleKind::LowCtr => (current.ctr < rule.threshold
            && current.position <= LOW_CTR_MAX_POSITION)
            .then(|| bucket_severity(rule.threshold - current.ctr, CTR_CUTPOINTS)),
        DecayRuleKind::ImpressionsDrop => {
            let before = daily_rate(previous.impressions, rule.comparison_window_days);
            if before <= 0.0 {
                return None;
            }
            let drop = 1.0 - daily_rate(current.impressions, rule.sustained_days) / before;
            (drop >= rule.threshold).then(|| bucket_severity(drop, IMPRESSIONS_DROP_CUTPOINTS))
        }
    }?;

    Some(DecaySignal {
        page: current.page.clone(),
        reason: rule.kind,
        severity,
        metrics: DecayMetrics {
            position_before: previous.position,
            position_now: current.position,
            position_delta: current.position - previous.position,
            ctr_before: previous.ctr,
            ctr_now: current.ctr,
            impressions: current.impressions,
        },
    })
}

/// Applies quiet-period, impression and comparison gates before the rule condition.
pub fn evaluate_windows(
    rule: &DecayRule,
    current: &[PageMetrics],
    previous: &[PageMetrics],
    published_dates: &HashMap<String, DateTime<Utc>>,
    quiet_period: QuietPeriodConfig,
    now: DateTime<Utc>,
) -> Vec<DecaySignal> {
    let previous_by_page = previous
        .iter()
        .map(|m| (m.page.as_str(), m))
        .collect::<HashMap<_, _>>();

    current
        .iter()
        .filter(|m| {
            !published_dates
                .get(&m.page)
                .is_some_and(|published| quiet_period.suppresses(*published, now))
        })
        .filter(|m| m.impressions >= rule.min_impressions)
        .filter_map(|m| {
            let before = previous_by_page.get(m.page.as_str())?;
            evaluate_rule(rule, m, before)
        })
        .collect()
}

/// One signal per page: strictly higher severity replaces, ties keep the first seen.
pub fn dedupe_by_page(signals: Vec<DecaySignal>) -> Vec<DecaySignal> {
    let mut out: Vec<DecaySignal> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for signal in signals {
        match positions.get(&signal.page) {
            Some(&pos) => {
                if signal.severity.rank() > out[pos].severity.rank() {
                    out[pos] = signal;
                }
            }
            None => {
                positions.insert(signal.page.clone(), out.len());
                out.push(signal);
            }
        }
    }
    out
}

pub struct DecayDetector<S> {
    source: S,
    rules: Vec<DecayRule>,
}

impl<S: MetricsSource> DecayDetector<S> {
    pub fn new(source: S, rules: Vec<DecayRule>) -> Result<Self, RuleError> {
        validate_rules(&rules)?;
        Ok(Self { source, rules })
    }

    pub fn with_default_rules(source: S) -> Self {
        Self {
            source,
            rules: DecayRule::defaults(),
        }
    }

    pub fn rules(&self) -> &[DecayRule] {
        &self.rules
    }

    /// Runs every rule for `site_url` with windows anchored at `reference`.
    pub async fn detect_decay(
        &self,
        site_url: &str,
        published_dates: &HashMap<String, DateTime<Utc>>,
        quiet_period: QuietPeriodConfig,
        reference: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<DecaySignal>, SourceError> {
        let mut signals = Vec::new();
        for rule in &self.rules {
            let (current_window, previous_window) = rule_windows(rule, reference);
            let span = info_span!("decay_rule", rule = rule.kind.as_str(), site_url);
            let (current, previous) = async {
                tokio::try_join!(
                    self.source.page_metrics(site_url, current_window),
                    self.source.page_metrics(site_url, previous_window),
                )
            }
            .instrument(span)
            .await?;

            let fired = evaluate_windows(rule, &current, &previous, published_dates, quiet_period, now);
            debug!(
                rule = rule.kind.as_str(),
                pages = current.len(),
                fired = fired.len(),
                "evaluated decay rule"
            );
            signals.extend(fired);
        }
        Ok(dedupe_by_page(signals))
    }
}
