//! Queries where several of our own pages compete for the same ranking.

use std::collections::BTreeMap;

use gsc_core::{CannibalizationReport, QueryPageMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CannibalizationConfig {
    pub max_position: f64,
    pub min_impressions: i64,
}

impl Default for CannibalizationConfig {
    fn default() -> Self {
        Self {
            max_position: 20.0,
            min_impressions: 50,
        }
    }
}

/// Groups rows by query; reports queries with two or more qualifying pages,
/// busiest query first.
pub fn detect_cannibalization(
    rows: &[QueryPageMetrics],
    config: &CannibalizationConfig,
) -> Vec<CannibalizationReport> {
    let mut by_query: BTreeMap<&str, Vec<QueryPageMetrics>> = BTreeMap::new();
    for row in rows
        .iter()
        .filter(|r| r.position <= config.max_position && r.impressions >= config.min_impressions)
    {
        by_query.entry(row.query.as_str()).or_default().push(row.clone());
    }

    let mut reports = by_query
        .into_iter()
        .filter(|(_, pages)| pages.len() >= 2)
        .map(|(query, mut pages)| {
            pages.sort_by(|a, b| b.impressions.cmp(&a.impressions));
            CannibalizationReport {
                query: query.to_string(),
                total_impressions: pages.iter().map(|p| p.impressions).sum(),
                pages,
            }
        })
        .collect::<Vec<_>>();
    reports.sort_by(|a, b| b.total_impressions.cmp(&a.total_impressions));
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(query: &str, page: &str, impressions: i64, position: f64) -> QueryPageMetrics {
        QueryPageMetrics {
            query: query.into(),
            page: page.into(),
            clicks: 0,
            impressions,
            position,
        }
    }

    #[test]
    fn reports_only_queries_with_competing_pages() {
        let rows = vec![
            row("rust sqlx", "/a", 100, 6.0),
            row("rust sqlx", "/b", 400, 9.0),
            row("rust sqlx", "/c", 10, 3.0),
            row("axum tutorial", "/d", 900, 2.0),
            row("axum tutorial", "/e", 900, 45.0),
        ];
        let reports = detect_cannibalization(&rows, &CannibalizationConfig::default());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].query, "rust sqlx");
        assert_eq!(reports[0].total_impressions, 500);
        assert_eq!(reports[0].pages[0].page, "/b");
    }
}
