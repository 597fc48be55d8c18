//! Trial state machine: statuses, guarded transitions, and the canonical
//! trial record.
//!
//! # Status Flow
//!
//! ```text
//! Initialized → Researching → Deliberating ─┬─ accept ─────────→ Accepted ─────────┐
//!                   ▲                        ├─ reject, rounds left → Rejected ─┐   │
//!                   └────────── requeue ─────┼──────────────────────────────────┘   │
//!                                            └─ reject, ceiling → ForcedTermination ┤
//!                                                                                   ▼
//!                                                   Completed ← GeneratingResult ←──┘
//! ```
//!
//! `TrialState` is owned by the driver for the whole trial. Components
//! receive it by reference for one step at a time and never keep a handle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Feedback, VerdictPayload};
use crate::error::{ProtocolViolation, TransitionError, TrialError};
use crate::evidence::{AdmitResult, EvidenceItem, EvidenceStore, Side, SourceDedupPolicy, SourceId};

/// Status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Initialized,
    Researching,
    Deliberating,
    Rejected,
    Accepted,
    ForcedTermination,
    GeneratingResult,
    Completed,
}

impl TrialStatus {
    /// Whether a verdict has been reached. A trial in a terminal status
    /// always carries a final verdict, and only then.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::ForcedTermination | Self::GeneratingResult | Self::Completed
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(self) -> &'static [TrialStatus] {
        match self {
            Self::Initialized => &[Self::Researching],
            Self::Researching => &[Self::Deliberating],
            Self::Deliberating => &[Self::Accepted, Self::Rejected, Self::ForcedTermination],
            Self::Rejected => &[Self::Researching],
            Self::Accepted | Self::ForcedTermination => &[Self::GeneratingResult],
            Self::GeneratingResult => &[Self::Completed],
            Self::Completed => &[],
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Researching => write!(f, "researching"),
            Self::Deliberating => write!(f, "deliberating"),
            Self::Rejected => write!(f, "rejected"),
            Self::Accepted => write!(f, "accepted"),
            Self::ForcedTermination => write!(f, "forced_termination"),
            Self::GeneratingResult => write!(f, "generating_result"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A status transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TrialStatus,
    pub to: TrialStatus,
    /// Completed rounds at the time of the transition.
    pub round: u32,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Bookkeeping for one completed research round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-indexed).
    pub round: u32,
    pub added_for: usize,
    pub added_against: usize,
    /// Findings turned away by deduplication.
    pub rejected: usize,
    /// Collaborator errors, one line per failed request.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Queries issued this round, per side.
    #[serde(default)]
    pub queries: BTreeMap<Side, Vec<String>>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// A degraded outcome the trial recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Incident {
    /// A research request failed and contributed nothing.
    ResearchFailed { round: u32, side: Side, error: String },
    /// The arbiter failed; a default ruling was substituted.
    ArbitrationFailed { round: u32, error: String },
    /// The arbiter returned a structurally invalid decision.
    ProtocolViolation {
        round: u32,
        violation: ProtocolViolation,
    },
    /// The arbiter rejected at the round ceiling; acceptance was forced.
    RoundCeilingOverride { round: u32 },
}

/// Compact counts for logs and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub topic: String,
    pub status: TrialStatus,
    pub round: u32,
    pub max_rounds: u32,
    pub for_count: usize,
    pub against_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_against: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// The canonical record of a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialState {
    trial_id: Uuid,
    topic: String,
    round: u32,
    max_rounds: u32,
    status: TrialStatus,
    #[serde(flatten)]
    evidence: EvidenceStore,
    pending_feedback: Option<Feedback>,
    suggested_queries: BTreeMap<Side, Vec<String>>,
    used_queries: BTreeMap<Side, Vec<String>>,
    final_verdict: Option<VerdictPayload>,
    rounds_log: Vec<RoundRecord>,
    incidents: Vec<Incident>,
    transitions: Vec<TransitionRecord>,
    created_at: DateTime<Utc>,
}

impl TrialState {
    /// Create a trial in `Initialized`.
    pub fn new(topic: &str, max_rounds: u32) -> Result<Self, TrialError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(TrialError::EmptyTopic);
        }
        if max_rounds == 0 {
            return Err(crate::error::ConfigError::ZeroRounds.into());
        }
        Ok(Self {
            trial_id: Uuid::new_v4(),
            topic: topic.to_string(),
            round: 0,
            max_rounds,
            status: TrialStatus::Initialized,
            evidence: EvidenceStore::default(),
            pending_feedback: None,
            suggested_queries: BTreeMap::new(),
            used_queries: BTreeMap::new(),
            final_verdict: None,
            rounds_log: Vec::new(),
            incidents: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Select the source-dedup policy. Only meaningful before evidence exists.
    pub fn with_source_dedup(mut self, policy: SourceDedupPolicy) -> Self {
        if self.evidence.is_empty() {
            self.evidence = EvidenceStore::new(policy);
        }
        self
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Check `to` against the transition table and its guards.
    fn check(&self, to: TrialStatus) -> Result<(), TransitionError> {
        let refuse = |reason: String| TransitionError {
            from: self.status,
            to,
            reason,
        };

        if !self.status.valid_transitions().contains(&to) {
            return Err(refuse(format!(
                "not a valid transition (allowed: {:?})",
                self.status.valid_transitions()
            )));
        }
        match to {
            TrialStatus::Rejected if self.round >= self.max_rounds => Err(refuse(format!(
                "round ceiling reached ({}/{})",
                self.round, self.max_rounds
            ))),
            TrialStatus::ForcedTermination if self.round < self.max_rounds => Err(refuse(
                format!("rounds remain ({}/{})", self.round, self.max_rounds),
            )),
            _ => Ok(()),
        }
    }

    fn record(&mut self, to: TrialStatus, reason: &str) {
        tracing::debug!(
            from = %self.status,
            to = %to,
            round = self.round,
            "Trial transition"
        );
        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            round: self.round,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        self.status = to;
    }

    /// Move to a status that carries no payload.
    ///
    /// Entering `Accepted`/`ForcedTermination` requires a verdict and goes
    /// through [`conclude`](Self::conclude); entering `Rejected` requires
    /// feedback and goes through [`reject`](Self::reject).
    pub fn transition(&mut self, to: TrialStatus, reason: &str) -> Result<(), TransitionError> {
        self.check(to)?;
        match to {
            TrialStatus::Accepted | TrialStatus::ForcedTermination | TrialStatus::Rejected => {
                Err(TransitionError {
                    from: self.status,
                    to,
                    reason: "requires a ruling payload".to_string(),
                })
            }
            _ => {
                self.record(to, reason);
                Ok(())
            }
        }
    }

    /// Initialized → Researching.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(TrialStatus::Researching, "trial started")
    }

    /// Deliberating → Accepted, or → ForcedTermination for a forced verdict.
    ///
    /// Sets the final verdict exactly once.
    pub fn conclude(&mut self, verdict: VerdictPayload) -> Result<TrialStatus, TransitionError> {
        let to = if verdict.forced {
            TrialStatus::ForcedTermination
        } else {
            TrialStatus::Accepted
        };
        self.check(to)?;
        let reason = if verdict.forced {
            "round ceiling forced a verdict"
        } else {
            "arbiter accepted"
        };
        self.final_verdict = Some(verdict);
        self.record(to, reason);
        Ok(to)
    }

    /// Deliberating → Rejected, storing feedback for the next round.
    pub fn reject(&mut self, feedback: Feedback) -> Result<(), TransitionError> {
        self.check(TrialStatus::Rejected)?;
        for side in Side::BOTH {
            let queries: Vec<String> = feedback.queries(side).map(str::to_string).collect();
            self.suggested_queries.insert(side, queries);
        }
        self.pending_feedback = Some(feedback);
        self.record(TrialStatus::Rejected, "arbiter rejected");
        Ok(())
    }

    // ── Round bookkeeping ────────────────────────────────────────────────

    fn ensure_researching(&self) -> Result<(), TrialError> {
        if self.status != TrialStatus::Researching {
            return Err(TrialError::WrongStatus {
                expected: TrialStatus::Researching,
                actual: self.status,
            });
        }
        Ok(())
    }

    /// Admit a finding into the round in progress.
    pub fn admit(
        &mut self,
        side: Side,
        text: &str,
        source_id: Option<SourceId>,
    ) -> Result<AdmitResult, TrialError> {
        self.ensure_researching()?;
        Ok(self.evidence.admit(side, text, source_id, self.round + 1))
    }

    /// Remember queries a side has issued in the round in progress.
    pub fn record_queries(&mut self, side: Side, queries: &[String]) -> Result<(), TrialError> {
        self.ensure_researching()?;
        let used = self.used_queries.entry(side).or_default();
        for query in queries {
            let query = query.trim();
            if !query.is_empty() && !used.iter().any(|q| q == query) {
                used.push(query.to_string());
            }
        }
        Ok(())
    }

    /// Drop the prior round's feedback once it has been handed to research.
    pub fn consume_feedback(&mut self) -> Result<(), TrialError> {
        self.ensure_researching()?;
        self.pending_feedback = None;
        self.suggested_queries.clear();
        Ok(())
    }

    /// Close the round in progress; increments `round` by exactly one.
    pub fn complete_round(&mut self, record: RoundRecord) -> Result<u32, TrialError> {
        self.ensure_researching()?;
        if self.round >= self.max_rounds {
            return Err(TrialError::RoundCeiling {
                max_rounds: self.max_rounds,
            });
        }
        self.round += 1;
        self.rounds_log.push(record);
        Ok(self.round)
    }

    pub fn record_incident(&mut self, incident: Incident) {
        self.incidents.push(incident);
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn trial_id(&self) -> Uuid {
        self.trial_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Completed rounds.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn status(&self) -> TrialStatus {
        self.status
    }

    pub fn has_rounds_remaining(&self) -> bool {
        self.round < self.max_rounds
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn evidence_for(&self) -> &[EvidenceItem] {
        self.evidence.evidence_for()
    }

    pub fn evidence_against(&self) -> &[EvidenceItem] {
        self.evidence.evidence_against()
    }

    pub fn pending_feedback(&self) -> Option<&Feedback> {
        self.pending_feedback.as_ref()
    }

    pub fn suggested_queries(&self, side: Side) -> &[String] {
        self.suggested_queries
            .get(&side)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn used_queries(&self, side: Side) -> &[String] {
        self.used_queries
            .get(&side)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn final_verdict(&self) -> Option<&VerdictPayload> {
        self.final_verdict.as_ref()
    }

    pub fn rounds_log(&self) -> &[RoundRecord] {
        &self.rounds_log
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | for={} against={} | topic={}",
            self.status,
            self.round,
            self.max_rounds,
            self.evidence.evidence_for().len(),
            self.evidence.evidence_against().len(),
            self.topic
        )
    }

    pub fn evidence_summary(&self) -> EvidenceSummary {
        EvidenceSummary {
            topic: self.topic.clone(),
            status: self.status,
            round: self.round,
            max_rounds: self.max_rounds,
            for_count: self.evidence.evidence_for().len(),
            against_count: self.evidence.evidence_against().len(),
            latest_for: self.evidence.evidence_for().last().map(|i| i.text.clone()),
            latest_against: self.evidence.evidence_against().last().map(|i| i.text.clone()),
            feedback: self.pending_feedback.as_ref().map(|f| f.narrative.clone()),
        }
    }
}
