//! Arbitration step: consult the arbiter and enforce the round ceiling.
//!
//! The arbiter's answer is interpreted, never trusted:
//!
//! | Arbiter returns                  | Below ceiling           | At ceiling              |
//! |----------------------------------|-------------------------|-------------------------|
//! | accept + verdict text            | accept                  | accept                  |
//! | accept without text              | generic reject          | forced verdict          |
//! | reject + queries                 | reject                  | forced verdict          |
//! | reject without queries           | generic reject          | forced verdict          |
//! | error                            | generic reject          | forced verdict          |
//!
//! A forced verdict keeps the arbiter's draft text when one was supplied,
//! and is otherwise synthesized from the evidence at hand.

use std::sync::Arc;

use tracing::{info, warn};

use crate::budget::{BoundedItem, EvidenceBudget};
use crate::collaborator::{ArbitrationRequest, Arbiter};
use crate::decision::{Confidence, Decision, Feedback, VerdictPayload};
use crate::error::ProtocolViolation;
use crate::state::{Incident, TrialState};

/// Narrative used when the arbiter's own feedback is unusable.
pub const GENERIC_FEEDBACK: &str =
    "Insufficient evidence formatting/quality. Provide 2-3 concrete, verifiable facts per side.";

/// Characters kept per key point in a synthesized verdict.
const KEY_POINT_CHARS: usize = 160;

/// Key points taken per side for a synthesized verdict.
const KEY_POINTS_PER_SIDE: usize = 3;

/// The interpreted outcome of one arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ruling {
    Accept(VerdictPayload),
    Reject(Feedback),
}

impl Ruling {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// A ruling plus the incidents raised while reaching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arbitration {
    pub ruling: Ruling,
    pub incidents: Vec<Incident>,
}

/// Applies the evidence budget, calls the arbiter, and interprets the result.
pub struct Arbitrator {
    arbiter: Arc<dyn Arbiter>,
    budget: EvidenceBudget,
}

impl Arbitrator {
    pub fn new(arbiter: Arc<dyn Arbiter>, budget: EvidenceBudget) -> Self {
        Self { arbiter, budget }
    }

    pub fn request(&self, state: &TrialState) -> ArbitrationRequest {
        ArbitrationRequest {
            topic: state.topic().to_string(),
            evidence: self.budget.apply(state.evidence()),
            round: state.round(),
            max_rounds: state.max_rounds(),
        }
    }

    /// Decide on the evidence in `state`. Never fails.
    ///
    /// At or past the ceiling the ruling is always an acceptance.
    pub async fn arbitrate(&self, state: &TrialState) -> Arbitration {
        let request = self.request(state);
        let round = request.round;
        let at_ceiling = request.is_final_round();
        let mut incidents = Vec::new();

        let decision = match self.arbiter.decide(&request).await {
            Ok(decision) => Some(decision),
            Err(error) => {
                warn!(round, error = %error, "Arbiter failed");
                incidents.push(Incident::ArbitrationFailed {
                    round,
                    error: error.to_string(),
                });
                None
            }
        };

        // An accepted verdict with text is final either way.
        if let Some(decision) = &decision {
            if decision.accepted {
                match decision.verdict.as_ref().filter(|v| v.has_text()) {
                    Some(verdict) => {
                        let mut verdict = verdict.clone();
                        verdict.forced = false;
                        info!(round, confidence = %verdict.confidence, "Arbiter accepted");
                        return Arbitration {
                            ruling: Ruling::Accept(verdict),
                            incidents,
                        };
                    }
                    None => {
                        warn!(round, "Arbiter accepted without a verdict");
                        incidents.push(Incident::ProtocolViolation {
                            round,
                            violation: ProtocolViolation::AcceptWithoutVerdict,
                        });
                    }
                }
            }
        }

        if at_ceiling {
            incidents.push(Incident::RoundCeilingOverride { round });
            let draft = decision
                .as_ref()
                .and_then(|d| d.verdict.as_ref())
                .filter(|v| v.has_text());
            let verdict = match draft {
                Some(draft) => VerdictPayload {
                    forced: true,
                    ..draft.clone()
                },
                None => synthesize_verdict(&request),
            };
            warn!(
                round,
                max_rounds = request.max_rounds,
                kept_draft = draft.is_some(),
                "Round ceiling reached, forcing verdict"
            );
            return Arbitration {
                ruling: Ruling::Accept(verdict),
                incidents,
            };
        }

        let feedback = match decision {
            Some(Decision {
                accepted: false,
                feedback: Some(feedback),
                ..
            }) if feedback.has_queries() => feedback,
            Some(Decision { accepted, .. }) => {
                if !accepted {
                    warn!(round, "Arbiter rejected without follow-up queries");
                    incidents.push(Incident::ProtocolViolation {
                        round,
                        violation: ProtocolViolation::RejectWithoutFeedback,
                    });
                }
                generic_feedback(&request.topic)
            }
            None => generic_feedback(&request.topic),
        };

        info!(
            round,
            queries_for = feedback.queries_for.len(),
            queries_against = feedback.queries_against.len(),
            "Arbiter requested another round"
        );
        Arbitration {
            ruling: Ruling::Reject(feedback),
            incidents,
        }
    }
}

/// Re-query feedback substituted for a missing or malformed rejection.
pub fn generic_feedback(topic: &str) -> Feedback {
    Feedback::new(GENERIC_FEEDBACK).with_queries(
        vec![format!("\"{topic}\" achievements legacy")],
        vec![format!("\"{topic}\" controversy criticism")],
    )
}

/// Build a low-confidence forced verdict from the bounded evidence.
pub fn synthesize_verdict(request: &ArbitrationRequest) -> VerdictPayload {
    let points = |items: &[BoundedItem]| -> Vec<String> {
        items
            .iter()
            .rev()
            .take(KEY_POINTS_PER_SIDE)
            .map(|item| clip(&item.text, KEY_POINT_CHARS))
            .collect()
    };
    let key_points_for = points(&request.evidence.evidence_for);
    let key_points_against = points(&request.evidence.evidence_against);

    let mut text = format!(
        "FORCED VERDICT (max rounds reached) for '{}'. The arbiter did not settle within \
         {} round(s); this summary rests on {} favorable and {} critical finding(s).",
        request.topic,
        request.max_rounds,
        request.evidence.evidence_for.len(),
        request.evidence.evidence_against.len()
    );
    if key_points_for.is_empty() && key_points_against.is_empty() {
        text.push_str(" No evidence was gathered.");
    }

    VerdictPayload {
        verdict_text: text,
        confidence: Confidence::Low,
        key_points_for,
        key_points_against,
        forced: true,
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::evidence::Side;
    use crate::mock::ScriptedArbiter;
    use crate::state::TrialStatus;

    /// State after `rounds` completed rounds, with one item per side.
    fn state_after(rounds: u32, max_rounds: u32) -> TrialState {
        let mut state = TrialState::new("Napoleon", max_rounds).unwrap();
        state.start().unwrap();
        state.admit(Side::For, "Napoleonic Code", None).unwrap();
        state.admit(Side::Against, "Haitian campaign", None).unwrap();
        for round in 1..=rounds {
            state
                .complete_round(crate::state::RoundRecord {
                    round,
                    added_for: 0,
                    added_against: 0,
                    rejected: 0,
                    errors: Vec::new(),
                    queries: Default::default(),
                    duration_ms: 0,
                    started_at: chrono::Utc::now(),
                })
                .unwrap();
        }
        state
            .transition(TrialStatus::Deliberating, "round complete")
            .unwrap();
        state
    }

    fn arbitrator(steps: Vec<Result<Decision, CollaboratorError>>) -> Arbitrator {
        Arbitrator::new(Arc::new(ScriptedArbiter::new(steps)), EvidenceBudget::default())
    }

    fn useful_feedback() -> Feedback {
        Feedback::new("need more").with_queries(vec!["x".into()], vec!["y".into()])
    }

    #[tokio::test]
    async fn test_accept_passes_through() {
        let verdict = VerdictPayload::new("Mixed legacy.", Confidence::High);
        let arb = arbitrator(vec![Ok(Decision::accept(verdict.clone()))]);
        let result = arb.arbitrate(&state_after(1, 3)).await;
        assert_eq!(result.ruling, Ruling::Accept(verdict));
        assert!(result.incidents.is_empty());
    }

    #[tokio::test]
    async fn test_reject_below_ceiling_keeps_feedback() {
        let arb = arbitrator(vec![Ok(Decision::reject(useful_feedback()))]);
        let result = arb.arbitrate(&state_after(1, 3)).await;
        assert_eq!(result.ruling, Ruling::Reject(useful_feedback()));
        assert!(result.incidents.is_empty());
    }

    #[tokio::test]
    async fn test_reject_at_ceiling_is_forced() {
        let arb = arbitrator(vec![Ok(Decision::reject(useful_feedback()))]);
        let result = arb.arbitrate(&state_after(2, 2)).await;
        let Ruling::Accept(verdict) = result.ruling else {
            panic!("expected forced acceptance");
        };
        assert!(verdict.forced);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(verdict.verdict_text.starts_with("FORCED VERDICT"));
        assert_eq!(verdict.key_points_for, vec!["Napoleonic Code".to_string()]);
        assert_eq!(result.incidents, vec![Incident::RoundCeilingOverride { round: 2 }]);
    }

    #[tokio::test]
    async fn test_draft_text_kept_when_forced() {
        let draft = VerdictPayload::new("Leaning positive.", Confidence::Medium);
        let arb = arbitrator(vec![Ok(
            Decision::reject(useful_feedback()).with_draft(draft.clone())
        )]);
        let result = arb.arbitrate(&state_after(1, 1)).await;
        let Ruling::Accept(verdict) = result.ruling else {
            panic!("expected forced acceptance");
        };
        assert_eq!(verdict.verdict_text, "Leaning positive.");
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert!(verdict.forced);
    }

    #[tokio::test]
    async fn test_reject_without_queries_substitutes_generic() {
        let arb = arbitrator(vec![Ok(Decision::reject(Feedback::new("vague")))]);
        let result = arb.arbitrate(&state_after(1, 3)).await;
        let Ruling::Reject(feedback) = result.ruling else {
            panic!("expected rejection");
        };
        assert_eq!(feedback.narrative, GENERIC_FEEDBACK);
        assert_eq!(
            feedback.queries_for,
            vec!["\"Napoleon\" achievements legacy".to_string()]
        );
        assert_eq!(
            result.incidents,
            vec![Incident::ProtocolViolation {
                round: 1,
                violation: ProtocolViolation::RejectWithoutFeedback,
            }]
        );
    }

    #[tokio::test]
    async fn test_accept_without_text_is_violation() {
        let arb = arbitrator(vec![Ok(Decision::accept(VerdictPayload::new(
            "  ",
            Confidence::High,
        )))]);
        let result = arb.arbitrate(&state_after(1, 3)).await;
        assert!(!result.ruling.is_accept());
        assert_eq!(
            result.incidents,
            vec![Incident::ProtocolViolation {
                round: 1,
                violation: ProtocolViolation::AcceptWithoutVerdict,
            }]
        );
    }

    #[tokio::test]
    async fn test_arbiter_error_degrades() {
        let arb = arbitrator(vec![Err(CollaboratorError::Inference("503".into()))]);
        let below = arb.arbitrate(&state_after(1, 3)).await;
        assert!(matches!(below.ruling, Ruling::Reject(ref fb) if fb.has_queries()));
        assert!(matches!(below.incidents[0], Incident::ArbitrationFailed { round: 1, .. }));

        let arb = arbitrator(vec![Err(CollaboratorError::Inference("503".into()))]);
        let at = arb.arbitrate(&state_after(3, 3)).await;
        assert!(matches!(at.ruling, Ruling::Accept(ref v) if v.forced));
        assert_eq!(at.incidents.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_applied_to_request() {
        let scripted = Arc::new(ScriptedArbiter::new(vec![]));
        let budget = EvidenceBudget {
            max_total_chars: 1_000,
            max_item_chars: 5,
        };
        let arb = Arbitrator::new(scripted.clone(), budget);
        arb.arbitrate(&state_after(1, 3)).await;
        let seen = &scripted.requests()[0];
        assert!(seen.evidence.evidence_for[0].truncated);
        assert_eq!(seen.evidence.evidence_for[0].text.chars().count(), 5);
        assert_eq!(seen.round, 1);
        assert_eq!(seen.max_rounds, 3);
    }

    #[test]
    fn test_synthesized_verdict_without_evidence() {
        let request = ArbitrationRequest {
            topic: "X".into(),
            evidence: Default::default(),
            round: 1,
            max_rounds: 1,
        };
        let verdict = synthesize_verdict(&request);
        assert!(verdict.forced);
        assert!(verdict.verdict_text.contains("No evidence was gathered"));
        assert!(verdict.key_points_for.is_empty());
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        let clipped = clip(&"a".repeat(200), KEY_POINT_CHARS);
        assert_eq!(clipped.chars().count(), KEY_POINT_CHARS);
    }
}
