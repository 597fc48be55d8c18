//! Trial runner: drives a trial from `Initialized` to `Completed`.
//!
//! The loop is a strict alternation of one research round and one
//! arbitration. It owns the [`TrialState`] and lends it to the round
//! controller and the arbitrator for one step at a time.
//!
//! Termination: every pass runs exactly one round, and the arbitrator
//! always accepts once `round ≥ max_rounds`, so a trial takes at most
//! `max_rounds` rounds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::arbitration::{Arbitrator, Ruling};
use crate::collaborator::{Arbiter, ResearchProvider};
use crate::config::TrialConfig;
use crate::decision::VerdictPayload;
use crate::error::TrialError;
use crate::round::RoundController;
use crate::state::{TrialState, TrialStatus};

/// The payload handed to the result sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub verdict: VerdictPayload,
    pub state: TrialState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn is_forced(&self) -> bool {
        self.verdict.forced
    }

    /// Whether any collaborator failed or misbehaved along the way.
    pub fn is_degraded(&self) -> bool {
        self.verdict.forced || !self.state.incidents().is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        let status = if self.is_forced() { "FORCED" } else { "ACCEPTED" };
        format!(
            "[{}] {} rounds | confidence={} | for={} against={} | topic={}",
            status,
            self.state.round(),
            self.verdict.confidence,
            self.state.evidence_for().len(),
            self.state.evidence_against().len(),
            self.state.topic()
        )
    }
}

/// Runs trials against a fixed set of collaborators.
///
/// Collaborators are chosen at construction time; real LLM-backed ones and
/// the scripted doubles in [`crate::mock`] are interchangeable.
pub struct TrialRunner {
    config: TrialConfig,
    rounds: RoundController,
    arbitrator: Arbitrator,
}

impl TrialRunner {
    pub fn new(
        config: TrialConfig,
        advocate: Arc<dyn ResearchProvider>,
        critic: Arc<dyn ResearchProvider>,
        arbiter: Arc<dyn Arbiter>,
    ) -> Result<Self, TrialError> {
        config.validate()?;
        let rounds = RoundController::new(advocate, critic, &config);
        let arbitrator = Arbitrator::new(arbiter, config.evidence_budget);
        Ok(Self {
            config,
            rounds,
            arbitrator,
        })
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    /// Run a trial on `topic` to completion.
    ///
    /// Errors only on invalid input or an internal sequencing fault;
    /// collaborator failures degrade the verdict instead.
    pub async fn run(&self, topic: &str) -> Result<TrialResult, TrialError> {
        let state = TrialState::new(topic, self.config.max_rounds)?
            .with_source_dedup(self.config.source_dedup);
        self.run_state(state).await
    }

    /// Drive an `Initialized` state to completion.
    pub async fn run_state(&self, mut state: TrialState) -> Result<TrialResult, TrialError> {
        let started_at = Utc::now();
        info!(
            trial_id = %state.trial_id(),
            topic = %state.topic(),
            max_rounds = state.max_rounds(),
            dispatch = %self.rounds.dispatch(),
            "Trial started"
        );
        state.start()?;

        while !state.status().is_terminal() {
            self.rounds.run_round(&mut state).await?;
            state.transition(TrialStatus::Deliberating, "round complete")?;

            let arbitration = self.arbitrator.arbitrate(&state).await;
            for incident in arbitration.incidents {
                state.record_incident(incident);
            }

            match arbitration.ruling {
                Ruling::Accept(verdict) => {
                    state.conclude(verdict)?;
                }
                Ruling::Reject(feedback) => {
                    state.reject(feedback)?;
                    state.transition(TrialStatus::Researching, "requeue")?;
                }
            }
            debug!(status = %state.status_line(), "Deliberation applied");
        }

        state.transition(TrialStatus::GeneratingResult, "finalize")?;
        let verdict = state
            .final_verdict()
            .cloned()
            .ok_or(TrialError::MissingVerdict(state.status()))?;
        state.transition(TrialStatus::Completed, "result built")?;

        let result = TrialResult {
            trial_id: state.trial_id(),
            verdict,
            state,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            trial_id = %result.trial_id,
            forced = result.is_forced(),
            incidents = result.state.incidents().len(),
            duration_ms = result.duration_ms(),
            "{}",
            result.summary_line()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{Finding, ResearchReport};
    use crate::decision::{Confidence, Decision, Feedback};
    use crate::mock::{ScriptedArbiter, ScriptedResearcher};

    fn runner(max_rounds: u32, arbiter: ScriptedArbiter) -> TrialRunner {
        let config = TrialConfig {
            max_rounds,
            ..Default::default()
        };
        TrialRunner::new(
            config,
            Arc::new(ScriptedResearcher::synthetic()),
            Arc::new(ScriptedResearcher::synthetic()),
            Arc::new(arbiter),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_when_arbiter_satisfied() {
        let result = runner(3, ScriptedArbiter::accept_on_round(2))
            .run("Napoleon")
            .await
            .unwrap();
        assert!(!result.is_forced());
        assert_eq!(result.state.round(), 2);
        assert_eq!(result.state.status(), TrialStatus::Completed);
        assert_eq!(result.state.evidence_for().len(), 2);
        assert!(!result.is_degraded());
        assert!(result.summary_line().starts_with("[ACCEPTED] 2 rounds"));
    }

    #[tokio::test]
    async fn test_always_reject_terminates() {
        for max_rounds in 1..=4 {
            let arbiter = ScriptedArbiter::always_reject(
                Feedback::new("more").with_queries(vec!["a".into()], vec!["b".into()]),
            );
            let result = runner(max_rounds, arbiter).run("X").await.unwrap();
            assert_eq!(result.state.round(), max_rounds);
            assert!(result.is_forced());
            assert_eq!(result.state.status(), TrialStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_transition_log_shape() {
        let result = runner(2, ScriptedArbiter::accept_on_round(5))
            .run("X")
            .await
            .unwrap();
        let path: Vec<TrialStatus> = result.state.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                TrialStatus::Researching,
                TrialStatus::Deliberating,
                TrialStatus::Rejected,
                TrialStatus::Researching,
                TrialStatus::Deliberating,
                TrialStatus::ForcedTermination,
                TrialStatus::GeneratingResult,
                TrialStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let err = runner(1, ScriptedArbiter::new(vec![]))
            .run("   ")
            .await
            .unwrap_err();
        assert_eq!(err, TrialError::EmptyTopic);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrialConfig {
            max_rounds: 0,
            ..Default::default()
        };
        let result = TrialRunner::new(
            config,
            Arc::new(ScriptedResearcher::new(vec![])),
            Arc::new(ScriptedResearcher::new(vec![])),
            Arc::new(ScriptedArbiter::new(vec![])),
        );
        assert!(matches!(result, Err(TrialError::Config(_))));
    }

    #[tokio::test]
    async fn test_first_round_accept() {
        let verdict = VerdictPayload::new("Settled.", Confidence::High);
        let arbiter = ScriptedArbiter::new(vec![Ok(Decision::accept(verdict.clone()))]);
        let config = TrialConfig::default();
        let runner = TrialRunner::new(
            config,
            Arc::new(ScriptedResearcher::new(vec![Ok(ResearchReport::new(vec![
                Finding::new("fact"),
            ]))])),
            Arc::new(ScriptedResearcher::new(vec![])),
            Arc::new(arbiter),
        )
        .unwrap();
        let result = runner.run("X").await.unwrap();
        assert_eq!(result.verdict, verdict);
        assert_eq!(result.state.round(), 1);
        assert_eq!(result.state.final_verdict(), Some(&verdict));
    }
}
