//! Round controller: one research round for both sides.
//!
//! Each side receives an owned [`ResearchRequest`] snapshot. The two requests
//! run concurrently (or back to back in [`DispatchMode::Sequential`]) and
//! neither sees the other's findings. Only after both have finished does the
//! controller touch [`TrialState`]: it merges findings in a fixed order
//! (favorable side first), records failures, and closes the round.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::collaborator::{ResearchProvider, ResearchReport, ResearchRequest};
use crate::config::{DispatchMode, TrialConfig};
use crate::error::{CollaboratorError, TrialError};
use crate::evidence::Side;
use crate::state::{Incident, RoundRecord, TrialState, TrialStatus};

/// A research request that failed and contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideError {
    pub side: Side,
    pub error: CollaboratorError,
}

/// Result of [`RoundController::run_round`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// The round just completed (1-indexed).
    pub round: u32,
    pub added_for: usize,
    pub added_against: usize,
    /// Findings turned away by the evidence store.
    pub rejected: usize,
    pub errors: Vec<SideError>,
}

impl RoundOutcome {
    pub fn added(&self) -> usize {
        self.added_for + self.added_against
    }
}

#[derive(Debug, Default)]
struct MergeCounts {
    added: usize,
    rejected: usize,
}

/// Drives research rounds against two providers.
pub struct RoundController {
    advocate: Arc<dyn ResearchProvider>,
    critic: Arc<dyn ResearchProvider>,
    dispatch: DispatchMode,
    timeout: Option<Duration>,
    config: TrialConfig,
}

impl RoundController {
    /// `advocate` researches the favorable side, `critic` the critical side.
    pub fn new(
        advocate: Arc<dyn ResearchProvider>,
        critic: Arc<dyn ResearchProvider>,
        config: &TrialConfig,
    ) -> Self {
        Self {
            advocate,
            critic,
            dispatch: config.dispatch,
            timeout: config.research_timeout(),
            config: config.clone(),
        }
    }

    pub fn dispatch(&self) -> DispatchMode {
        self.dispatch
    }

    /// Build the request `side` will receive for the upcoming round.
    pub fn request_for(&self, state: &TrialState, side: Side) -> ResearchRequest {
        ResearchRequest {
            topic: state.topic().to_string(),
            side,
            bias: self.config.bias(side).to_string(),
            suggested_queries: state.suggested_queries(side).to_vec(),
            feedback: state.pending_feedback().map(|f| f.narrative.clone()),
            used_queries: state.used_queries(side).to_vec(),
            round: state.round() + 1,
        }
    }

    /// Run one round: research both sides, merge, and advance `round` by one.
    ///
    /// Collaborator failures never escape; they show up in
    /// [`RoundOutcome::errors`] and as incidents on the state. The only
    /// errors returned are driver misuse (wrong status, ceiling reached).
    pub async fn run_round(&self, state: &mut TrialState) -> Result<RoundOutcome, TrialError> {
        if state.status() != TrialStatus::Researching {
            return Err(TrialError::WrongStatus {
                expected: TrialStatus::Researching,
                actual: state.status(),
            });
        }
        if !state.has_rounds_remaining() {
            return Err(TrialError::RoundCeiling {
                max_rounds: state.max_rounds(),
            });
        }
        let round = state.round() + 1;
        let started_at = Utc::now();
        let clock = Instant::now();

        let for_request = self.request_for(state, Side::For);
        let against_request = self.request_for(state, Side::Against);

        let (for_result, against_result) = match self.dispatch {
            DispatchMode::Concurrent => tokio::join!(
                self.research(self.advocate.as_ref(), &for_request),
                self.research(self.critic.as_ref(), &against_request),
            ),
            DispatchMode::Sequential => {
                let for_result = self.research(self.advocate.as_ref(), &for_request).await;
                let against_result = self.research(self.critic.as_ref(), &against_request).await;
                (for_result, against_result)
            }
        };

        // Both requests have been handed the prior feedback.
        state.consume_feedback()?;

        let mut outcome = RoundOutcome {
            round,
            ..Default::default()
        };
        let mut queries = BTreeMap::new();
        let mut error_lines = Vec::new();
        let mut rejected = 0;

        for (side, result) in [(Side::For, for_result), (Side::Against, against_result)] {
            match result {
                Ok(report) => {
                    let counts = merge(state, side, &report)?;
                    match side {
                        Side::For => outcome.added_for = counts.added,
                        Side::Against => outcome.added_against = counts.added,
                    }
                    rejected += counts.rejected;
                    state.record_queries(side, &report.queries)?;
                    queries.insert(side, report.queries);
                }
                Err(error) => {
                    warn!(round, %side, error = %error, "Research request failed");
                    error_lines.push(format!("{side}: {error}"));
                    state.record_incident(Incident::ResearchFailed {
                        round,
                        side,
                        error: error.to_string(),
                    });
                    outcome.errors.push(SideError { side, error });
                }
            }
        }
        outcome.rejected = rejected;

        let duration_ms = clock.elapsed().as_millis() as u64;
        state.complete_round(RoundRecord {
            round,
            added_for: outcome.added_for,
            added_against: outcome.added_against,
            rejected,
            errors: error_lines,
            queries,
            duration_ms,
            started_at,
        })?;

        info!(
            round,
            max_rounds = state.max_rounds(),
            added_for = outcome.added_for,
            added_against = outcome.added_against,
            rejected,
            errors = outcome.errors.len(),
            dispatch = %self.dispatch,
            duration_ms,
            "Research round complete"
        );
        Ok(outcome)
    }

    async fn research(
        &self,
        provider: &dyn ResearchProvider,
        request: &ResearchRequest,
    ) -> Result<ResearchReport, CollaboratorError> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, provider.research(request)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(CollaboratorError::Timeout(limit.as_millis() as u64)),
            },
            None => provider.research(request).await,
        }
    }
}

/// Admit each finding of `report` for `side`.
fn merge(
    state: &mut TrialState,
    side: Side,
    report: &ResearchReport,
) -> Result<MergeCounts, TrialError> {
    let mut counts = MergeCounts::default();
    for finding in &report.findings {
        let result = state.admit(side, &finding.text, finding.source_id.clone())?;
        if result.accepted {
            counts.added += 1;
        } else {
            counts.rejected += 1;
        }
    }
    Ok(counts)
}
