use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use court::{ContentLookup, DispatchMode, TrialConfig};
use rig::providers::openai;
use serde::{Deserialize, Serialize};

use crate::lookup::{FallbackLookup, WikipediaLookup};

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmEndpoint {
    /// Base URL including `/v1`.
    pub url: String,
    /// Model used by the two research agents.
    pub model: String,
    /// Model used by the judge (None = same as `model`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,
    pub api_key: String,
}

impl Default for LlmEndpoint {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/v1".into(),
            model: "gpt-4o-mini".into(),
            judge_model: None,
            api_key: "not-needed".into(),
        }
    }
}

impl LlmEndpoint {
    pub fn judge_model(&self) -> &str {
        self.judge_model.as_deref().unwrap_or(&self.model)
    }
}

/// Wikipedia lookup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    /// MediaWiki API endpoint.
    pub url: String,
    /// Articles per query (clamped to 1..=5).
    pub top_k: usize,
    /// Characters kept per article extract (clamped to 200..=400000).
    pub doc_chars_max: usize,
    pub timeout_secs: u64,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            url: "https://en.wikipedia.org/w/api.php".into(),
            top_k: 2,
            doc_chars_max: 1400,
            timeout_secs: 20,
        }
    }
}

impl WikipediaConfig {
    pub fn top_k(&self) -> usize {
        self.top_k.clamp(1, 5)
    }

    pub fn doc_chars_max(&self) -> usize {
        self.doc_chars_max.clamp(200, 400_000)
    }
}

/// Top-level configuration.
///
/// Precedence: CLI flags > TOML file > environment > built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourtConfig {
    pub llm: LlmEndpoint,
    /// Retries for transient LLM failures.
    pub llm_retries: u32,
    /// Base backoff in milliseconds (doubled per attempt).
    pub retry_base_ms: u64,
    /// Lookups a research agent issues per round.
    pub max_queries_per_round: usize,
    pub wikipedia: WikipediaConfig,
    /// Where verdicts and telemetry are written.
    pub output_dir: PathBuf,
    pub trial: TrialConfig,
}

impl Default for CourtConfig {
    fn default() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }
}

impl CourtConfig {
    /// Build defaults from a variable source (the process environment in
    /// [`Default`]).
    pub fn from_env_with(get: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_llm = LlmEndpoint::default();
        let base_wiki = WikipediaConfig::default();
        let mut trial = TrialConfig::default();
        if let Some(rounds) = parse_env(&text, "COURT_MAX_ROUNDS") {
            trial.max_rounds = rounds;
        }
        if let Some(secs) = parse_env(&text, "COURT_RESEARCH_TIMEOUT_SECS") {
            trial.research_timeout_secs = secs;
        }
        if let Some(parallel) = text("COURT_PARALLEL") {
            trial.dispatch = if is_truthy(&parallel) {
                DispatchMode::Concurrent
            } else {
                DispatchMode::Sequential
            };
        }

        Self {
            llm: LlmEndpoint {
                url: text("COURT_LLM_URL").unwrap_or(base_llm.url),
                model: text("COURT_LLM_MODEL").unwrap_or(base_llm.model),
                judge_model: text("COURT_JUDGE_MODEL"),
                api_key: text("COURT_LLM_API_KEY").unwrap_or(base_llm.api_key),
            },
            llm_retries: parse_env(&text, "COURT_LLM_RETRIES").unwrap_or(3),
            retry_base_ms: 1_500,
            max_queries_per_round: 2,
            wikipedia: WikipediaConfig {
                url: text("WIKIPEDIA_URL").unwrap_or(base_wiki.url),
                top_k: parse_env(&text, "WIKIPEDIA_TOP_K").unwrap_or(base_wiki.top_k),
                doc_chars_max: parse_env(&text, "WIKIPEDIA_DOC_CHARS_MAX").unwrap_or(base_wiki.doc_chars_max),
                timeout_secs: base_wiki.timeout_secs,
            },
            output_dir: text("COURT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("verdicts")),
            trial,
        }
    }

    /// Environment defaults overlaid by `path`, when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse TOML over the environment defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Self::default().overlay_toml(text)
    }

    /// Overlay TOML onto `self`; keys absent from `text` keep their values,
    /// at every table depth.
    pub fn overlay_toml(self, text: &str) -> Result<Self> {
        let mut base = toml::Value::try_from(&self).context("Failed to encode config")?;
        let overlay: toml::Value = toml::from_str(text)?;
        merge_toml(&mut base, overlay);
        let config: Self = base.try_into()?;
        config.trial.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides, then re-validate the trial settings.
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<()> {
        if let Some(rounds) = overrides.max_rounds {
            self.trial.max_rounds = rounds;
        }
        if let Some(secs) = overrides.research_timeout_secs {
            self.trial.research_timeout_secs = secs;
        }
        if overrides.sequential {
            self.trial.dispatch = DispatchMode::Sequential;
        }
        if let Some(dir) = &overrides.output_dir {
            self.output_dir = dir.clone();
        }
        self.trial.validate().context("Invalid trial configuration")?;
        Ok(())
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.output_dir.join("court-telemetry.jsonl")
    }
}

/// Settings taken from command-line flags. `None`/`false` leaves the
/// loaded value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub max_rounds: Option<u32>,
    pub research_timeout_secs: Option<u64>,
    pub sequential: bool,
    pub output_dir: Option<PathBuf>,
}

fn parse_env<T: FromStr>(text: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    text(key).and_then(|v| v.parse().ok())
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_toml(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Pre-built clients for the configured endpoints.
///
/// Research agents and the judge share one rig client; model selection
/// happens via the model name in each request. Both researchers share one
/// lookup chain.
pub struct ClientSet {
    pub llm: openai::CompletionsClient,
    pub lookup: Arc<FallbackLookup>,
}

impl ClientSet {
    pub fn from_config(config: &CourtConfig) -> Result<Self> {
        let llm = openai::CompletionsClient::builder()
            .api_key(&config.llm.api_key)
            .base_url(&config.llm.url)
            .build()
            .with_context(|| format!("Failed to build LLM client ({})", config.llm.url))?;
        let wikipedia: Arc<dyn ContentLookup> = Arc::new(WikipediaLookup::new(&config.wikipedia)?);
        let lookup = Arc::new(FallbackLookup::new().with_provider("wikipedia", wikipedia));
        Ok(Self { llm, lookup })
    }
}

/// Check if an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use court::SourceDedupPolicy;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> CourtConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CourtConfig::from_env_with(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = from_vars(&[]);
        assert_eq!(config.llm.url, "http://localhost:8080/v1");
        assert_eq!(config.llm.judge_model(), config.llm.model);
        assert_eq!(config.llm_retries, 3);
        assert_eq!(config.max_queries_per_round, 2);
        assert_eq!(config.wikipedia.top_k(), 2);
        assert_eq!(config.wikipedia.doc_chars_max(), 1400);
        assert_eq!(config.output_dir, PathBuf::from("verdicts"));
        assert_eq!(config.trial, TrialConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_vars(&[
            ("COURT_LLM_URL", "http://gpu-01:8081/v1"),
            ("COURT_LLM_MODEL", "qwen"),
            ("COURT_JUDGE_MODEL", "qwen-large"),
            ("COURT_MAX_ROUNDS", "5"),
            ("COURT_PARALLEL", "false"),
            ("COURT_LLM_RETRIES", "1"),
            ("WIKIPEDIA_TOP_K", "9"),
            ("WIKIPEDIA_DOC_CHARS_MAX", "50"),
            ("COURT_OUTPUT_DIR", "/tmp/out"),
        ]);
        assert_eq!(config.llm.url, "http://gpu-01:8081/v1");
        assert_eq!(config.llm.judge_model(), "qwen-large");
        assert_eq!(config.trial.max_rounds, 5);
        assert_eq!(config.trial.dispatch, DispatchMode::Sequential);
        assert_eq!(config.llm_retries, 1);
        assert_eq!(config.wikipedia.top_k(), 5);
        assert_eq!(config.wikipedia.doc_chars_max(), 200);
        assert_eq!(config.telemetry_path(), PathBuf::from("/tmp/out/court-telemetry.jsonl"));
    }

    #[test]
    fn test_garbage_env_falls_back() {
        let config = from_vars(&[("COURT_MAX_ROUNDS", "many"), ("WIKIPEDIA_TOP_K", "")]);
        assert_eq!(config.trial.max_rounds, 3);
        assert_eq!(config.wikipedia.top_k, 2);
    }

    #[test]
    fn test_toml_overlay() {
        let config = CourtConfig::from_toml(
            r#"
output_dir = "trials"
llm_retries = 0

[llm]
model = "llama-3.1-8b"

[trial]
max_rounds = 4
dispatch = "sequential"
source_dedup = "global"

[trial.evidence_budget]
max_total_chars = 8000
"#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("trials"));
        assert_eq!(config.llm_retries, 0);
        assert_eq!(config.llm.model, "llama-3.1-8b");
        assert_eq!(config.trial.max_rounds, 4);
        assert_eq!(config.trial.dispatch, DispatchMode::Sequential);
        assert_eq!(config.trial.source_dedup, SourceDedupPolicy::Global);
        assert_eq!(config.trial.evidence_budget.max_total_chars, 8000);
        assert_eq!(config.trial.evidence_budget.max_item_chars, 3000);
    }

    #[test]
    fn test_partial_table_keeps_env_values() {
        let env = from_vars(&[("COURT_LLM_URL", "http://gpu-01:8081/v1")]);
        let config = env.overlay_toml("[llm]\nmodel = \"qwen\"\n").unwrap();
        assert_eq!(config.llm.url, "http://gpu-01:8081/v1");
        assert_eq!(config.llm.model, "qwen");
    }

    #[test]
    fn test_toml_rejects_zero_rounds() {
        assert!(CourtConfig::from_toml("[trial]\nmax_rounds = 0\n").is_err());
    }

    #[test]
    fn test_cli_beats_toml_beats_env() {
        let env = from_vars(&[
            ("COURT_MAX_ROUNDS", "5"),
            ("COURT_RESEARCH_TIMEOUT_SECS", "30"),
            ("COURT_OUTPUT_DIR", "/tmp/env"),
        ]);
        assert_eq!(env.trial.research_timeout_secs, 30);

        let mut config = env
            .overlay_toml("[trial]\nmax_rounds = 4\nresearch_timeout_secs = 20\n")
            .unwrap();
        assert_eq!(config.trial.max_rounds, 4);
        assert_eq!(config.trial.research_timeout_secs, 20);

        config
            .apply_overrides(&CliOverrides {
                max_rounds: Some(2),
                research_timeout_secs: Some(10),
                sequential: true,
                output_dir: None,
            })
            .unwrap();
        assert_eq!(config.trial.max_rounds, 2);
        assert_eq!(config.trial.research_timeout_secs, 10);
        assert_eq!(config.trial.dispatch, DispatchMode::Sequential);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/env"));
    }

    #[test]
    fn test_empty_overrides_keep_loaded_values() {
        let mut config = from_vars(&[("COURT_MAX_ROUNDS", "5")])
            .overlay_toml("[trial]\nresearch_timeout_secs = 20\n")
            .unwrap();
        let before = config.clone();
        config.apply_overrides(&CliOverrides::default()).unwrap();
        assert_eq!(config, before);
        assert_eq!(config.trial.max_rounds, 5);
    }

    #[test]
    fn test_override_output_dir() {
        let mut config = from_vars(&[("COURT_OUTPUT_DIR", "/tmp/env")]);
        config
            .apply_overrides(&CliOverrides {
                output_dir: Some(PathBuf::from("/tmp/cli")),
                ..CliOverrides::default()
            })
            .unwrap();
        assert_eq!(config.telemetry_path(), PathBuf::from("/tmp/cli/court-telemetry.jsonl"));
    }

    #[test]
    fn test_override_is_validated() {
        let mut config = from_vars(&[]);
        let err = config
            .apply_overrides(&CliOverrides {
                max_rounds: Some(0),
                ..CliOverrides::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("Invalid trial configuration"));
    }

    #[test]
    fn test_client_set_chains_wikipedia() {
        let clients = ClientSet::from_config(&from_vars(&[])).unwrap();
        assert_eq!(clients.lookup.provider_names(), vec!["wikipedia"]);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = CourtConfig::load(Some(Path::new("/nonexistent/court.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
