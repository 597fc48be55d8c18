//! Arbitration decision types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::evidence::Side;

/// How confident the arbiter is in a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown confidence level: {other:?}")),
        }
    }
}

/// The final (or draft) verdict of a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictPayload {
    pub verdict_text: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub key_points_for: Vec<String>,
    #[serde(default)]
    pub key_points_against: Vec<String>,
    /// Imposed by the round ceiling rather than reached by the arbiter.
    #[serde(default)]
    pub forced: bool,
}

impl VerdictPayload {
    pub fn new(verdict_text: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            verdict_text: verdict_text.into(),
            confidence,
            key_points_for: Vec::new(),
            key_points_against: Vec::new(),
            forced: false,
        }
    }

    pub fn with_key_points(mut self, for_points: Vec<String>, against_points: Vec<String>) -> Self {
        self.key_points_for = for_points;
        self.key_points_against = against_points;
        self
    }

    pub fn has_text(&self) -> bool {
        !self.verdict_text.trim().is_empty()
    }
}

/// Rejection feedback steering the next round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub narrative: String,
    #[serde(default)]
    pub queries_for: Vec<String>,
    #[serde(default)]
    pub queries_against: Vec<String>,
}

impl Feedback {
    pub fn new(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            ..Self::default()
        }
    }

    pub fn with_queries(mut self, queries_for: Vec<String>, queries_against: Vec<String>) -> Self {
        self.queries_for = queries_for;
        self.queries_against = queries_against;
        self
    }

    /// Non-blank follow-up queries for `side`.
    pub fn queries(&self, side: Side) -> impl Iterator<Item = &str> {
        let queries = match side {
            Side::For => &self.queries_for,
            Side::Against => &self.queries_against,
        };
        queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
    }

    /// Whether at least one side received a follow-up query.
    pub fn has_queries(&self) -> bool {
        Side::BOTH.iter().any(|side| self.queries(*side).next().is_some())
    }
}

/// A decision as returned by an arbiter.
///
/// An arbiter may attach a draft verdict to a rejection; it is used only
/// when the round ceiling forces acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl Decision {
    pub fn accept(verdict: VerdictPayload) -> Self {
        Self {
            accepted: true,
            verdict: Some(verdict),
            feedback: None,
        }
    }

    pub fn reject(feedback: Feedback) -> Self {
        Self {
            accepted: false,
            verdict: None,
            feedback: Some(feedback),
        }
    }

    /// Attach a draft verdict to a rejection.
    pub fn with_draft(mut self, verdict: VerdictPayload) -> Self {
        self.verdict = Some(verdict);
        self
    }
}
