//! Collaborator seams: research providers, the arbiter, and content lookup.
//!
//! The engine only talks to these traits. Production implementations are
//! LLM-backed and live in `court-agents`; tests inject scripted doubles
//! from [`crate::mock`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::BoundedEvidence;
use crate::decision::Decision;
use crate::error::CollaboratorError;
use crate::evidence::{Side, SourceId};

/// Everything a research provider needs for one round.
///
/// Built as an owned snapshot, so providers never see live trial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    pub side: Side,
    /// Bias descriptor ("favorable: ..." / "critical: ...").
    pub bias: String,
    /// Follow-up queries from the last rejection, if any.
    #[serde(default)]
    pub suggested_queries: Vec<String>,
    /// Narrative of the last rejection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Queries this side already issued in earlier rounds.
    #[serde(default)]
    pub used_queries: Vec<String>,
    /// Round being researched (1-indexed).
    pub round: u32,
}

/// One candidate piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
}

impl Finding {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: None,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<SourceId>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// What a research provider returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchReport {
    /// Queries actually issued.
    #[serde(default)]
    pub queries: Vec<String>,
    pub findings: Vec<Finding>,
}

impl ResearchReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self {
            queries: Vec::new(),
            findings,
        }
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }
}

/// Input to one arbitration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub topic: String,
    /// Evidence after the budget was applied.
    pub evidence: BoundedEvidence,
    /// Completed rounds.
    pub round: u32,
    pub max_rounds: u32,
}

impl ArbitrationRequest {
    /// Whether this is the last chance to accept before the ceiling.
    pub fn is_final_round(&self) -> bool {
        self.round >= self.max_rounds
    }
}

/// Gathers findings for one side of a trial.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, request: &ResearchRequest) -> Result<ResearchReport, CollaboratorError>;
}

/// Judges the accumulated evidence.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn decide(&self, request: &ArbitrationRequest) -> Result<Decision, CollaboratorError>;
}

/// Fetches reference text for a query.
///
/// `focus` is a hint (e.g. the topic) used to drop irrelevant results.
#[async_trait]
pub trait ContentLookup: Send + Sync {
    async fn lookup(&self, query: &str, focus: &str) -> Result<Vec<Finding>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_builder() {
        let finding = Finding::new("fact").with_source("wikipedia:X");
        assert_eq!(finding.source_id.unwrap().as_str(), "wikipedia:X");
    }

    #[test]
    fn test_report_deserializes_without_queries() {
        let report: ResearchReport =
            serde_json::from_str(r#"{"findings": [{"text": "a"}]}"#).unwrap();
        assert!(report.queries.is_empty());
        assert_eq!(report.findings[0].text, "a");
        assert!(report.findings[0].source_id.is_none());
    }

    #[test]
    fn test_final_round_flag() {
        let mut request = ArbitrationRequest {
            topic: "X".into(),
            evidence: BoundedEvidence::default(),
            round: 2,
            max_rounds: 3,
        };
        assert!(!request.is_final_round());
        request.round = 3;
        assert!(request.is_final_round());
    }
}
