//! Agent builders for the trial.
//!
//! Each agent is built via a free function that returns
//! `Agent<openai::completion::CompletionModel>`. The `AgentFactory` ties them
//! together using `ClientSet` and `CourtConfig`, and wraps them into the
//! engine's collaborator traits. [`Collaborators`] picks between those and
//! the scripted offline doubles.

pub mod judge;
pub mod researcher;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rig::agent::Agent;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::{debug, info, warn};

use court::mock::{ScriptedArbiter, ScriptedResearcher};
use court::{
    Arbiter, CollaboratorError, ContentLookup, ResearchProvider, Side, TrialConfig, TrialError,
    TrialRunner,
};

use crate::config::{check_endpoint, ClientSet, CourtConfig};
use crate::retry::{classify, retry_transient, RetryPolicy};
use judge::LlmArbiter;
use researcher::LlmResearcher;

pub type OaiAgent = Agent<openai::completion::CompletionModel>;

/// A single-turn text completion.
///
/// Trait exists so tests can inject a stub without needing an inference endpoint.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Production [`TextModel`] backed by a Rig agent, with retry.
pub struct RigModel {
    name: &'static str,
    agent: OaiAgent,
    retry: RetryPolicy,
}

impl RigModel {
    pub fn new(name: &'static str, agent: OaiAgent, retry: RetryPolicy) -> Self {
        Self { name, agent, retry }
    }
}

#[async_trait]
impl TextModel for RigModel {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let started = std::time::Instant::now();
        let response = retry_transient(self.name, self.retry, || async {
            self.agent.prompt(prompt).await
        })
        .await
        .map_err(|e| classify(&e))?;
        debug!(
            agent = self.name,
            response_ms = started.elapsed().as_millis() as u64,
            chars = response.len(),
            "Agent responded"
        );
        Ok(response)
    }
}

/// Factory that builds all trial agents from a `CourtConfig`.
pub struct AgentFactory {
    pub clients: ClientSet,
    pub config: CourtConfig,
}

impl AgentFactory {
    pub fn new(config: &CourtConfig) -> Result<Self> {
        let clients = ClientSet::from_config(config)?;
        Ok(Self {
            clients,
            config: config.clone(),
        })
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.llm_retries, self.config.retry_base_ms)
    }

    /// Build the query-writing agent for `side`.
    pub fn build_researcher_agent(&self, side: Side) -> OaiAgent {
        researcher::build_researcher(&self.clients.llm, &self.config.llm.model, side)
    }

    /// Build the judge agent.
    pub fn build_judge_agent(&self) -> OaiAgent {
        judge::build_judge(&self.clients.llm, self.config.llm.judge_model())
    }

    /// Research provider for `side`, looking evidence up through the shared
    /// lookup chain.
    pub fn researcher(&self, side: Side) -> LlmResearcher {
        let lookup: Arc<dyn ContentLookup> = self.clients.lookup.clone();
        self.researcher_with(side, lookup)
    }

    /// Research provider for `side`, looking evidence up through `lookup`.
    pub fn researcher_with(&self, side: Side, lookup: Arc<dyn ContentLookup>) -> LlmResearcher {
        let name = match side {
            Side::For => "advocate",
            Side::Against => "critic",
        };
        let model = RigModel::new(name, self.build_researcher_agent(side), self.retry());
        LlmResearcher::new(side, Arc::new(model), lookup)
            .with_max_queries(self.config.max_queries_per_round)
    }

    /// The arbiter.
    pub fn arbiter(&self) -> LlmArbiter {
        let model = RigModel::new("judge", self.build_judge_agent(), self.retry());
        LlmArbiter::new(Arc::new(model))
    }
}

/// The three collaborators a trial needs.
pub struct Collaborators {
    pub advocate: Arc<dyn ResearchProvider>,
    pub critic: Arc<dyn ResearchProvider>,
    pub arbiter: Arc<dyn Arbiter>,
    pub offline: bool,
}

impl Collaborators {
    /// Deterministic scripted collaborators. No network is touched; the
    /// arbiter accepts on the last round.
    pub fn offline(trial: &TrialConfig) -> Self {
        Self {
            advocate: Arc::new(ScriptedResearcher::synthetic()),
            critic: Arc::new(ScriptedResearcher::synthetic()),
            arbiter: Arc::new(ScriptedArbiter::accept_on_round(trial.max_rounds)),
            offline: true,
        }
    }

    /// LLM-backed collaborators, or the scripted ones when `offline`.
    pub async fn build(config: &CourtConfig, offline: bool) -> Result<Self> {
        Self::build_with_check(config, offline, |url| async move { check_endpoint(&url).await })
            .await
    }

    /// [`Collaborators::build`] with the endpoint reachability check
    /// supplied by the caller.
    pub async fn build_with_check<P, F>(config: &CourtConfig, offline: bool, reachable: P) -> Result<Self>
    where
        P: FnOnce(String) -> F,
        F: Future<Output = bool>,
    {
        if offline {
            info!("Offline mode: using scripted collaborators");
            return Ok(Self::offline(&config.trial));
        }

        if !reachable(config.llm.url.clone()).await {
            warn!(
                url = %config.llm.url,
                "LLM endpoint not reachable; research and arbitration will degrade"
            );
        }
        let factory = AgentFactory::new(config)?;
        Ok(Self {
            advocate: Arc::new(factory.researcher(Side::For)),
            critic: Arc::new(factory.researcher(Side::Against)),
            arbiter: Arc::new(factory.arbiter()),
            offline: false,
        })
    }

    pub fn into_runner(self, trial: TrialConfig) -> Result<TrialRunner, TrialError> {
        TrialRunner::new(trial, self.advocate, self.critic, self.arbiter)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::config::CliOverrides;

    fn unreachable_config() -> CourtConfig {
        let mut config = CourtConfig::from_env_with(|_| None);
        config.llm.url = "http://127.0.0.1:9/v1".into();
        config.wikipedia.url = "http://127.0.0.1:9/w/api.php".into();
        config
    }

    #[tokio::test]
    async fn test_offline_skips_endpoint_check_and_runs_scripted_trial() {
        let mut config = unreachable_config();
        config
            .apply_overrides(&CliOverrides {
                max_rounds: Some(2),
                ..CliOverrides::default()
            })
            .unwrap();
        let checked = AtomicBool::new(false);

        let collaborators = Collaborators::build_with_check(&config, true, |_| async {
            checked.store(true, Ordering::SeqCst);
            true
        })
        .await
        .unwrap();

        assert!(collaborators.offline);
        assert!(!checked.load(Ordering::SeqCst));

        let result = collaborators
            .into_runner(config.trial.clone())
            .unwrap()
            .run("Napoleon")
            .await
            .unwrap();
        assert!(!result.is_forced());
        assert_eq!(result.state.round(), 2);
        assert_eq!(result.state.evidence_for().len(), 2);
        assert_eq!(
            result.state.evidence_for()[0].source_id.as_ref().unwrap().as_str(),
            "synthetic:for:1"
        );
    }

    #[tokio::test]
    async fn test_online_build_checks_endpoint() {
        let config = unreachable_config();
        let checked = AtomicBool::new(false);

        let collaborators = Collaborators::build_with_check(&config, false, |url| {
            assert_eq!(url, "http://127.0.0.1:9/v1");
            checked.store(true, Ordering::SeqCst);
            async { false }
        })
        .await
        .unwrap();

        assert!(!collaborators.offline);
        assert!(checked.load(Ordering::SeqCst));
    }
}
