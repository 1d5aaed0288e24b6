//! `config.json` loading. A scoped, immutable record loaded at startup and
//! replaceable only via an explicit reload — never a global mutable value.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct GraphConfig {
    pub edge_threshold: f64,
    pub resolution: f64,
    pub max_depth: i32,
    pub min_split_size: usize,
    /// `"louvain"` (default) or `"connected-components"` to force the
    /// dependency-free fallback described in §4.5.
    pub community_detection: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.3,
            resolution: 1.0,
            max_depth: 3,
            min_split_size: 10,
            community_detection: "louvain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SearchWeights {
    pub keyword: f64,
    pub term: f64,
    pub graph: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            term: 0.3,
            graph: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SearchConfig {
    pub weights: SearchWeights,
    /// `"weighted"` (default) or `"rrf"`.
    pub fusion: String,
    pub cache_size: usize,
    pub cache_ttl_s: u64,
    /// Damping factor `β` for one-hop graph-neighbor score propagation.
    pub graph_damping: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            weights: SearchWeights::default(),
            fusion: "weighted".to_string(),
            cache_size: 256,
            cache_ttl_s: 300,
            graph_damping: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BetaPrior {
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PatternConfig {
    pub priors: BTreeMap<String, BetaPrior>,
    pub recency_window_days: i64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        let mut priors = BTreeMap::new();
        priors.insert("preference".to_string(), BetaPrior { alpha: 1.0, beta: 4.0 });
        priors.insert("style".to_string(), BetaPrior { alpha: 1.0, beta: 5.0 });
        priors.insert("terminology".to_string(), BetaPrior { alpha: 2.0, beta: 3.0 });
        Self {
            priors,
            recency_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct BackupConfig {
    /// `"daily"`, `"weekly"`, or `"off"`.
    pub interval: String,
    pub retention: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval: "daily".to_string(),
            retention: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub tier2_age_days: i64,
    pub tier2_inactivity_days: i64,
    pub tier3_age_days: i64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tier2_age_days: 30,
            tier2_inactivity_days: 7,
            tier3_age_days: 90,
        }
    }
}

/// Top-level configuration, loaded from `config.json` with every field
/// optional so a partial or absent file still yields sane defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    pub graph: GraphConfig,
    pub search: SearchConfig,
    pub pattern: PatternConfig,
    pub backup: BackupConfig,
    pub compression: CompressionConfig,
}

impl Config {
    /// Loads `config.json` from `path`, falling back to defaults if the file
    /// does not exist. A malformed file is a validation error, not silently
    /// ignored.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| crate::error::EngineError::Validation(format!("invalid config.json: {e}")))?;
        Ok(config)
    }

    pub fn prior_for(&self, category: crate::model::PriorCategory) -> BetaPrior {
        let key = match category {
            crate::model::PriorCategory::Preference => "preference",
            crate::model::PriorCategory::Style => "style",
            crate::model::PriorCategory::Terminology => "terminology",
        };
        self.pattern
            .priors
            .get(key)
            .copied()
            .unwrap_or(BetaPrior { alpha: 1.0, beta: 4.0 })
    }
}
