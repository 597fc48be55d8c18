//! Trial configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::EvidenceBudget;
use crate::error::ConfigError;
use crate::evidence::{Side, SourceDedupPolicy};

/// How the two research requests of a round are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Both sides researched at the same time.
    #[default]
    Concurrent,
    /// Favorable side first, then the critical side.
    Sequential,
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrent => write!(f, "concurrent"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

/// Engine settings. Every field has a default, so partial TOML/JSON works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Research rounds before a verdict is forced.
    pub max_rounds: u32,
    pub dispatch: DispatchMode,
    /// Per-request research timeout in seconds (0 = none).
    pub research_timeout_secs: u64,
    pub source_dedup: SourceDedupPolicy,
    pub evidence_budget: EvidenceBudget,
    /// Bias descriptor handed to the favorable researcher.
    pub for_bias: String,
    /// Bias descriptor handed to the critical researcher.
    pub against_bias: String,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            dispatch: DispatchMode::default(),
            research_timeout_secs: 120,
            source_dedup: SourceDedupPolicy::default(),
            evidence_budget: EvidenceBudget::default(),
            for_bias: "favorable: achievements, contributions, legacy, reforms, innovations"
                .to_string(),
            against_bias:
                "critical: controversies, failures, casualties, criticism, scandals, corruption"
                    .to_string(),
        }
    }
}

impl TrialConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        let budget = &self.evidence_budget;
        if budget.max_total_chars == 0 || budget.max_item_chars == 0 {
            return Err(ConfigError::EmptyBudget {
                total: budget.max_total_chars,
                item: budget.max_item_chars,
            });
        }
        Ok(())
    }

    pub fn research_timeout(&self) -> Option<Duration> {
        (self.research_timeout_secs > 0).then(|| Duration::from_secs(self.research_timeout_secs))
    }

    pub fn bias(&self, side: Side) -> &str {
        match side {
            Side::For => &self.for_bias,
            Side::Against => &self.against_bias,
        }
    }
}
