//! Judge agent: weighs both evidence sets and returns a JSON decision.

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::providers::openai;
use serde::Deserialize;
use tracing::{debug, info};

use court::{
    ArbitrationRequest, Arbiter, CollaboratorError, Confidence, Decision, Feedback, VerdictPayload,
};

use super::{OaiAgent, TextModel};
use crate::prompts;

/// Build the judge agent.
///
/// NO tools: the judge only sees evidence passed via prompt.
/// Returns a single JSON decision object.
pub fn build_judge(client: &openai::CompletionsClient, model: &str) -> OaiAgent {
    client
        .agent(model)
        .name("judge")
        .description("Impartial judge. Accepts with a verdict or rejects with feedback.")
        .preamble(prompts::JUDGE_PREAMBLE)
        .temperature(0.2)
        .build()
}

/// Arbiter backed by the judge model.
pub struct LlmArbiter {
    model: Arc<dyn TextModel>,
}

impl LlmArbiter {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Arbiter for LlmArbiter {
    async fn decide(&self, request: &ArbitrationRequest) -> Result<Decision, CollaboratorError> {
        let prompt = prompts::deliberation_prompt(request);
        debug!(round = request.round, prompt_chars = prompt.len(), "Deliberating");
        let reply = self.model.complete(&prompt).await?;
        let decision = parse_decision(&reply)?;
        info!(
            round = request.round,
            accepted = decision.accepted,
            "Judge decided"
        );
        Ok(decision)
    }
}

/// Wire shape of the judge's reply. Every field is optional so a partial
/// object still parses and the engine's protocol checks see what is missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JudgeReply {
    decision: String,
    verdict: String,
    confidence: Option<String>,
    key_points_for: Vec<String>,
    key_points_against: Vec<String>,
    feedback: String,
    queries_for: Vec<String>,
    queries_against: Vec<String>,
}

/// Parse a judge reply into a [`Decision`].
///
/// The first `{` to the last `}` is taken as the JSON object, so prose or
/// code fences around it are tolerated.
pub fn parse_decision(reply: &str) -> Result<Decision, CollaboratorError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| CollaboratorError::Malformed("no JSON object in judge reply".into()))?;
    let parsed: JudgeReply = serde_json::from_str(json)
        .map_err(|e| CollaboratorError::Malformed(format!("judge reply: {e}")))?;

    let accepted = match parsed.decision.trim().to_ascii_lowercase().as_str() {
        "accept" | "accepted" => true,
        "reject" | "rejected" => false,
        other => {
            return Err(CollaboratorError::Malformed(format!(
                "unknown decision {other:?}"
            )))
        }
    };

    let confidence = match parsed.confidence.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.parse::<Confidence>().map_err(CollaboratorError::Malformed)?,
        _ if accepted => Confidence::Medium,
        _ => Confidence::Low,
    };
    let verdict = VerdictPayload::new(parsed.verdict.trim(), confidence)
        .with_key_points(clean(parsed.key_points_for), clean(parsed.key_points_against));

    if accepted {
        return Ok(Decision::accept(verdict));
    }

    let feedback = Feedback::new(parsed.feedback.trim())
        .with_queries(clean(parsed.queries_for), clean(parsed.queries_against));
    let decision = Decision::reject(feedback);
    Ok(if verdict.has_text() {
        decision.with_draft(verdict)
    } else {
        decision
    })
}

fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::stub::StubModel;
    use court::{EvidenceBudget, EvidenceStore, Side};

    #[test]
    fn test_parse_accept() {
        let reply = r#"Here is my ruling:
```json
{"decision": "accept", "verdict": "A mixed legacy.", "confidence": "HIGH",
 "key_points_for": ["Civil code", " "], "key_points_against": ["Wars"]}
```"#;
        let decision = parse_decision(reply).unwrap();
        assert!(decision.accepted);
        let verdict = decision.verdict.unwrap();
        assert_eq!(verdict.verdict_text, "A mixed legacy.");
        assert_eq!(verdict.confidence, Confidence::High);
        assert_eq!(verdict.key_points_for, vec!["Civil code"]);
        assert!(!verdict.forced);
    }

    #[test]
    fn test_parse_reject_with_queries() {
        let reply = r#"{"decision": "reject", "feedback": "Need the Russian campaign",
            "queries_against": ["Napoleon Russia 1812"]}"#;
        let decision = parse_decision(reply).unwrap();
        assert!(!decision.accepted);
        assert!(decision.verdict.is_none());
        let feedback = decision.feedback.unwrap();
        assert_eq!(feedback.narrative, "Need the Russian campaign");
        assert!(feedback.queries_for.is_empty());
        assert_eq!(feedback.queries_against, vec!["Napoleon Russia 1812"]);
    }

    #[test]
    fn test_parse_reject_keeps_draft() {
        let reply = r#"{"decision": "reject", "verdict": "Leaning positive", "feedback": "more"}"#;
        let decision = parse_decision(reply).unwrap();
        let draft = decision.verdict.unwrap();
        assert_eq!(draft.verdict_text, "Leaning positive");
        assert_eq!(draft.confidence, Confidence::Low);
    }

    #[test]
    fn test_accept_without_text_passes_through() {
        let decision = parse_decision(r#"{"decision": "accept"}"#).unwrap();
        assert!(decision.accepted);
        assert!(!decision.verdict.unwrap().has_text());
    }

    #[test]
    fn test_malformed_replies() {
        for reply in [
            "I accept.",
            "{not json}",
            r#"{"decision": "maybe"}"#,
            r#"{"decision": "accept", "verdict": "x", "confidence": "certain"}"#,
        ] {
            assert!(
                matches!(parse_decision(reply), Err(CollaboratorError::Malformed(_))),
                "{reply}"
            );
        }
    }

    #[tokio::test]
    async fn test_decide_prompts_with_round_and_evidence() {
        let model = Arc::new(StubModel::new(vec![Ok(
            r#"{"decision": "accept", "verdict": "Balanced.", "confidence": "medium"}"#.into(),
        )]));
        let arbiter = LlmArbiter::new(model.clone());
        let mut store = EvidenceStore::default();
        store.admit(Side::For, "Napoleonic Code", None, 1);
        let request = ArbitrationRequest {
            topic: "Napoleon".into(),
            evidence: EvidenceBudget::default().apply(&store),
            round: 2,
            max_rounds: 3,
        };

        let decision = arbiter.decide(&request).await.unwrap();
        assert!(decision.accepted);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("[1] Napoleonic Code"));
        assert!(prompt.contains("CURRENT ROUND: 2 of 3"));
    }

    #[tokio::test]
    async fn test_decide_propagates_model_failure() {
        let arbiter = LlmArbiter::new(Arc::new(StubModel::new(vec![Err(
            CollaboratorError::RateLimited("429".into()),
        )])));
        let request = ArbitrationRequest {
            topic: "Napoleon".into(),
            evidence: Default::default(),
            round: 1,
            max_rounds: 3,
        };
        assert_eq!(
            arbiter.decide(&request).await.unwrap_err(),
            CollaboratorError::RateLimited("429".into())
        );
    }
}
