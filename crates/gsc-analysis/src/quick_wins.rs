//! Pages ranking just off the top positions with enough demand to be worth a refresh.

use gsc_core::{PageMetrics, QuickWin};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuickWinConfig {
    pub min_position: f64,
    pub max_position: f64,
    pub min_impressions: i64,
    pub target_ctr: f64,
}

impl Default for QuickWinConfig {
    fn default() -> Self {
        Self {
            min_position: 4.0,
            max_position: 20.0,
            min_impressions: 100,
            target_ctr: 0.05,
        }
    }
}

pub fn find_quick_wins(metrics: &[PageMetrics], config: &QuickWinConfig) -> Vec<QuickWin> {
    let mut wins = metrics
        .iter()
        .filter(|m| m.position >= config.min_position && m.position <= config.max_position)
        .filter(|m| m.impressions >= config.min_impressions)
        .map(|m| QuickWin {
            page: m.page.clone(),
            position: m.position,
            ctr: m.ctr,
            impressions: m.impressions,
            clicks: m.clicks,
            estimated_click_upside: (m.impressions as f64 * (config.target_ctr - m.ctr)).max(0.0),
        })
        .collect::<Vec<_>>();
    wins.sort_by(|a, b| b.estimated_click_upside.total_cmp(&a.estimated_click_upside));
    wins
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(page: &str, position: f64, ctr: f64, impressions: i64) -> PageMetrics {
        PageMetrics {
            page: page.into(),
            clicks: 0,
            impressions,
            ctr,
            position,
        }
    }

    #[test]
    fn filters_by_position_band_and_demand() {
        let rows = vec![
            m("/top", 1.5, 0.3, 10_000),
            m("/striking", 8.0, 0.01, 5_000),
            m("/deep", 35.0, 0.0, 20_000),
            m("/thin", 9.0, 0.0, 20),
        ];
        let wins = find_quick_wins(&rows, &QuickWinConfig::default());
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].page, "/striking");
        assert!((wins[0].estimated_click_upside - 200.0).abs() < 1e-9);
    }

    #[test]
    fn sorted_by_upside_and_never_negative() {
        let rows = vec![
            m("/small", 6.0, 0.02, 1_000),
            m("/big", 12.0, 0.0, 4_000),
            m("/already-good", 5.0, 0.09, 9_000),
        ];
        let wins = find_quick_wins(&rows, &QuickWinConfig::default());
        let pages = wins.iter().map(|w| w.page.as_str()).collect::<Vec<_>>();
        assert_eq!(pages, vec!["/big", "/small", "/already-good"]);
        assert_eq!(wins[2].estimated_click_upside, 0.0);
    }
}
