//! Error taxonomy for the trial engine.
//!
//! Nothing here is fatal to a trial. Collaborator failures and protocol
//! violations are caught where the collaborator is invoked and degraded
//! into "zero evidence" or a default ruling; they surface only as
//! [`Incident`](crate::state::Incident) records. [`TrialError`] is reserved
//! for invalid input and for driver misuse (an illegal state transition).
//!
//! ## Collaborator retry classes
//!
//! | Variant      | Retriable |
//! |--------------|-----------|
//! | Inference    | yes       |
//! | RateLimited  | yes       |
//! | Lookup       | yes       |
//! | Timeout      | yes       |
//! | Malformed    | no        |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::TrialStatus;

/// A research or arbitration call failed or returned unusable data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The reasoning backend could not be reached or crashed mid-request.
    #[error("inference failure: {0}")]
    Inference(String),

    /// The reasoning backend refused the request due to quota.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The content lookup provider failed.
    #[error("content lookup failure: {0}")]
    Lookup(String),

    /// The collaborator answered, but the answer could not be interpreted.
    #[error("malformed collaborator output: {0}")]
    Malformed(String),

    /// The request did not finish within the configured window.
    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl CollaboratorError {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// A decision object that is structurally invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolViolation {
    /// The arbiter accepted but supplied no verdict text.
    #[error("accept without verdict text")]
    AcceptWithoutVerdict,

    /// The arbiter rejected without a follow-up query for either side.
    #[error("reject without follow-up queries")]
    RejectWithoutFeedback,
}

/// An attempted status change that the transition table forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: TrialStatus,
    pub to: TrialStatus,
    pub reason: String,
}

/// Configuration rejected by [`TrialConfig::validate`](crate::config::TrialConfig::validate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_rounds must be at least 1")]
    ZeroRounds,

    #[error("evidence budget must allow at least one character (total={total}, per item={item})")]
    EmptyBudget { total: usize, item: usize },
}

/// Errors surfaced by the trial driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrialError {
    #[error("topic must be a non-empty string")]
    EmptyTopic,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// An operation was attempted in a status that does not allow it.
    #[error("expected status {expected}, got {actual}")]
    WrongStatus {
        expected: TrialStatus,
        actual: TrialStatus,
    },

    /// A research round was requested after the round ceiling.
    #[error("round ceiling reached ({max_rounds} rounds)")]
    RoundCeiling { max_rounds: u32 },

    /// The state reached a verdict status without carrying a verdict.
    #[error("trial reached {0} without a final verdict")]
    MissingVerdict(TrialStatus),
}
