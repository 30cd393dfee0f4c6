//! YAML rule overrides under `<workspace>/rules/`.

use std::path::{Path, PathBuf};

use gsc_analysis::{
    validate_rules, CannibalizationConfig, PublishingImpactConfig, QuickWinConfig, RuleError,
};
use gsc_core::DecayRule;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid rule in {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: RuleError,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct DecayRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<DecayRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct InsightRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    quick_wins: Option<QuickWinConfig>,
    #[serde(default)]
    cannibalization: Option<CannibalizationConfig>,
    #[serde(default)]
    publishing_impact: Option<PublishingImpactConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightRules {
    pub decay: Vec<DecayRule>,
    pub quick_wins: QuickWinConfig,
    pub cannibalization: CannibalizationConfig,
    pub publishing_impact: PublishingImpactConfig,
}

impl Default for InsightRules {
    fn default() -> Self {
        Self {
            decay: DecayRule::defaults(),
            quick_wins: QuickWinConfig::default(),
            cannibalization: CannibalizationConfig::default(),
            publishing_impact: PublishingImpactConfig::default(),
        }
    }
}

impl InsightRules {
    /// Missing files keep the defaults; an empty decay rule list does too.
    pub fn from_workspace_root(root: &Path) -> Result<Self, RulesError> {
        let rules_dir = root.join("rules");
        let mut rules = Self::default();

        let decay_path = rules_dir.join("decay.yaml");
        if let Some(file) = read_yaml::<DecayRulesFile>(&decay_path)? {
            if !file.rules.is_empty() {
                validate_rules(&file.rules).map_err(|source| RulesError::Invalid {
                    path: decay_path.clone(),
                    source,
                })?;
                rules.decay = file.rules;
            }
        }

        let insights_path = rules_dir.join("insights.yaml");
        if let Some(file) = read_yaml::<InsightRulesFile>(&insights_path)? {
            if let Some(quick_wins) = file.quick_wins {
                rules.quick_wins = quick_wins;
            }
            if let Some(cannibalization) = file.cannibalization {
                rules.cannibalization = cannibalization;
            }
            if let Some(publishing_impact) = file.publishing_impact {
                rules.publishing_impact = publishing_impact;
            }
        }

        Ok(rules)
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, RulesError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RulesError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| RulesError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}
