//! Deterministic collaborators for tests and offline runs.
//!
//! Every double replays a script of results in order and records every
//! request it receives, so tests can assert on what a collaborator saw.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborator::{
    ArbitrationRequest, Arbiter, ContentLookup, Finding, ResearchProvider, ResearchReport,
    ResearchRequest,
};
use crate::decision::{Confidence, Decision, Feedback, VerdictPayload};
use crate::error::CollaboratorError;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Research provider that replays scripted reports.
///
/// Once the script runs out it returns an empty report, or one synthetic
/// finding per request when built with [`ScriptedResearcher::synthetic`].
pub struct ScriptedResearcher {
    steps: Mutex<VecDeque<Result<ResearchReport, CollaboratorError>>>,
    delay: Option<Duration>,
    synthetic: bool,
    requests: Mutex<Vec<ResearchRequest>>,
}

impl ScriptedResearcher {
    pub fn new(steps: Vec<Result<ResearchReport, CollaboratorError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            delay: None,
            synthetic: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Invents one distinct, sourced finding per request.
    pub fn synthetic() -> Self {
        Self {
            synthetic: true,
            ..Self::new(Vec::new())
        }
    }

    /// A provider whose every request fails with `error`.
    pub fn failing(error: CollaboratorError, requests: usize) -> Self {
        Self::new((0..requests).map(|_| Err(error.clone())).collect())
    }

    /// Sleep before answering (virtual time under `start_paused`).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ResearchRequest> {
        locked(&self.requests).clone()
    }

    fn invent(request: &ResearchRequest) -> ResearchReport {
        let angle = request
            .bias
            .split_once(':')
            .map_or(request.bias.as_str(), |(label, _)| label)
            .trim();
        let query = request
            .suggested_queries
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{} {angle}", request.topic));
        ResearchReport::new(vec![Finding::new(format!(
            "{} ({angle}, round {}): finding for \"{query}\"",
            request.topic, request.round
        ))
        .with_source(format!("synthetic:{}:{}", request.side, request.round))])
        .with_queries(vec![query])
    }
}

#[async_trait]
impl ResearchProvider for ScriptedResearcher {
    async fn research(
        &self,
        request: &ResearchRequest,
    ) -> Result<ResearchReport, CollaboratorError> {
        locked(&self.requests).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = locked(&self.steps).pop_front();
        match step {
            Some(result) => result,
            None if self.synthetic => Ok(Self::invent(request)),
            None => Ok(ResearchReport::default()),
        }
    }
}

/// What a [`ScriptedArbiter`] does once its script is exhausted.
#[derive(Debug, Clone)]
enum ArbiterFallback {
    Reject(Feedback),
    AcceptFromRound(u32),
}

/// Arbiter that replays scripted decisions.
pub struct ScriptedArbiter {
    steps: Mutex<VecDeque<Result<Decision, CollaboratorError>>>,
    fallback: ArbiterFallback,
    requests: Mutex<Vec<ArbitrationRequest>>,
}

impl ScriptedArbiter {
    /// Replays `steps`, then rejects with a generic re-query.
    pub fn new(steps: Vec<Result<Decision, CollaboratorError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: ArbiterFallback::Reject(
                Feedback::new("script exhausted")
                    .with_queries(vec!["more detail".into()], vec!["more detail".into()]),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Rejects every request with `feedback`.
    pub fn always_reject(feedback: Feedback) -> Self {
        Self {
            fallback: ArbiterFallback::Reject(feedback),
            ..Self::new(Vec::new())
        }
    }

    /// Rejects until `round` rounds are complete, then accepts.
    pub fn accept_on_round(round: u32) -> Self {
        Self {
            fallback: ArbiterFallback::AcceptFromRound(round),
            ..Self::new(Vec::new())
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ArbitrationRequest> {
        locked(&self.requests).clone()
    }

    fn fall_back(&self, request: &ArbitrationRequest) -> Decision {
        match &self.fallback {
            ArbiterFallback::Reject(feedback) => Decision::reject(feedback.clone()),
            ArbiterFallback::AcceptFromRound(round) if request.round >= *round => {
                let first = |items: &[crate::budget::BoundedItem]| -> Vec<String> {
                    items.iter().take(3).map(|item| item.text.clone()).collect()
                };
                Decision::accept(
                    VerdictPayload::new(
                        format!(
                            "Weighing {} favorable and {} critical findings on '{}', \
                             the record is mixed.",
                            request.evidence.evidence_for.len(),
                            request.evidence.evidence_against.len(),
                            request.topic
                        ),
                        Confidence::Medium,
                    )
                    .with_key_points(
                        first(&request.evidence.evidence_for),
                        first(&request.evidence.evidence_against),
                    ),
                )
            }
            ArbiterFallback::AcceptFromRound(_) => Decision::reject(
                Feedback::new("Need more concrete, verifiable facts.").with_queries(
                    vec![format!("{} achievements", request.topic)],
                    vec![format!("{} criticism", request.topic)],
                ),
            ),
        }
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn decide(&self, request: &ArbitrationRequest) -> Result<Decision, CollaboratorError> {
        locked(&self.requests).push(request.clone());
        let step = locked(&self.steps).pop_front();
        match step {
            Some(result) => result,
            None => Ok(self.fall_back(request)),
        }
    }
}

/// Content lookup that replays scripted hits and records each query.
///
/// Returns no hits once the script runs out.
#[derive(Default)]
pub struct ScriptedLookup {
    steps: Mutex<VecDeque<Result<Vec<Finding>, CollaboratorError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedLookup {
    pub fn new(steps: Vec<Result<Vec<Finding>, CollaboratorError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A lookup that never finds anything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        locked(&self.queries).clone()
    }
}

#[async_trait]
impl ContentLookup for ScriptedLookup {
    async fn lookup(&self, query: &str, _focus: &str) -> Result<Vec<Finding>, CollaboratorError> {
        locked(&self.queries).push(query.to_string());
        let step = locked(&self.steps).pop_front();
        step.unwrap_or_else(|| Ok(Vec::new()))
    }
}
