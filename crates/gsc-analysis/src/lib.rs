//! URL matching, decay detection and derived content insights.

pub mod cannibalization;
pub mod decay;
pub mod impact;
pub mod matcher;
pub mod quick_wins;
pub mod tasks;

pub use cannibalization::{detect_cannibalization, CannibalizationConfig};
pub use decay::{
    bucket_severity, dedupe_by_page, evaluate_rule, evaluate_windows, rule_windows,
    validate_rules, DecayDetector, RuleError,
};
pub use impact::{
    classify_impact, impact_candidates, impact_windows, is_measurable, measure_publishing_impact,
    ImpactCandidate, PublishingImpactConfig,
};
pub use matcher::{normalize_slug, normalize_url, similar_slugs, NormalizedUrl, SlugTable, UrlMatcher};
pub use quick_wins::{find_quick_wins, QuickWinConfig};
pub use tasks::{plan_refresh_tasks, plan_snapshots, published_dates_by_page};

pub const CRATE_NAME: &str = "gsc-analysis";
