//! Trials driven end to end through the LLM-backed collaborators, with the
//! model and the content lookup replaced by scripted stand-ins.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use court::{
    CollaboratorError, Confidence, ContentLookup, Finding, Incident, ProtocolViolation, Side,
    TrialConfig, TrialRunner,
};
use court_agents::agents::judge::LlmArbiter;
use court_agents::agents::researcher::LlmResearcher;
use court_agents::agents::TextModel;

struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CollaboratorError::Inference("connection refused".into()))
    }
}

struct RecordingLookup {
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl RecordingLookup {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentLookup for RecordingLookup {
    async fn lookup(&self, query: &str, focus: &str) -> Result<Vec<Finding>, CollaboratorError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(CollaboratorError::Lookup("HTTP 503".into()));
        }
        Ok(vec![Finding::new(format!("{focus}: article about {query}"))
            .with_source(format!("wikipedia:{query}"))])
    }
}

fn runner(
    max_rounds: u32,
    advocate_model: Arc<ScriptedModel>,
    advocate_lookup: Arc<RecordingLookup>,
    critic_model: Arc<ScriptedModel>,
    critic_lookup: Arc<RecordingLookup>,
    judge_model: Arc<ScriptedModel>,
) -> TrialRunner {
    let config = TrialConfig {
        max_rounds,
        ..TrialConfig::default()
    };
    TrialRunner::new(
        config,
        Arc::new(LlmResearcher::new(Side::For, advocate_model, advocate_lookup)),
        Arc::new(LlmResearcher::new(Side::Against, critic_model, critic_lookup)),
        Arc::new(LlmArbiter::new(judge_model)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_judge_feedback_steers_next_round() {
    let advocate_lookup = RecordingLookup::new(false);
    let critic_lookup = RecordingLookup::new(false);
    let judge = ScriptedModel::new(&[
        r#"{"decision": "reject", "feedback": "Cover education and Haiti",
            "queries_for": ["Napoleon lycee education"], "queries_against": ["Napoleon Haiti"]}"#,
        r#"{"decision": "accept", "verdict": "Reformer and autocrat.", "confidence": "high",
            "key_points_for": ["Civil code"], "key_points_against": ["Haiti"]}"#,
    ]);
    let runner = runner(
        3,
        ScriptedModel::new(&["civil code"]),
        advocate_lookup.clone(),
        ScriptedModel::new(&["Napoleon Russian campaign"]),
        critic_lookup.clone(),
        judge.clone(),
    );

    let result = runner.run("Napoleon").await.unwrap();

    assert!(!result.is_forced());
    assert_eq!(result.state.round(), 2);
    assert_eq!(result.verdict.verdict_text, "Reformer and autocrat.");
    assert_eq!(result.verdict.confidence, Confidence::High);
    assert_eq!(
        advocate_lookup.queries(),
        vec!["\"Napoleon\" civil code", "Napoleon lycee education"]
    );
    assert_eq!(
        critic_lookup.queries(),
        vec!["Napoleon Russian campaign", "Napoleon Haiti"]
    );
    assert_eq!(result.state.evidence_for().len(), 2);
    assert_eq!(result.state.evidence_against().len(), 2);
    assert_eq!(
        result.state.used_queries(Side::Against),
        ["Napoleon Russian campaign".to_string(), "Napoleon Haiti".to_string()]
    );

    let prompts = judge.prompts();
    assert!(prompts[0].contains("CURRENT ROUND: 1 of 3"));
    assert!(prompts[1].contains("CURRENT ROUND: 2 of 3"));
    assert!(prompts[1].contains("[2] Napoleon: article about Napoleon Haiti"));
}

#[tokio::test]
async fn test_unparsable_judge_forces_verdict_at_ceiling() {
    let judge = ScriptedModel::new(&["I think he was great.", "Still thinking."]);
    let runner = runner(
        2,
        ScriptedModel::new(&["reforms"]),
        RecordingLookup::new(false),
        ScriptedModel::new(&["wars"]),
        RecordingLookup::new(false),
        judge,
    );

    let result = runner.run("Napoleon").await.unwrap();

    assert!(result.is_forced());
    assert_eq!(result.state.round(), 2);
    assert_eq!(result.verdict.confidence, Confidence::Low);
    assert!(result.verdict.has_text());
    let failures = result
        .state
        .incidents()
        .iter()
        .filter(|i| matches!(i, Incident::ArbitrationFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_failing_lookups_still_terminate() {
    let runner = runner(
        2,
        ScriptedModel::new(&[]),
        RecordingLookup::new(true),
        ScriptedModel::new(&[]),
        RecordingLookup::new(true),
        ScriptedModel::new(&[]),
    );

    let result = runner.run("Napoleon").await.unwrap();

    assert!(result.is_forced());
    assert_eq!(result.state.round(), 2);
    assert!(result.state.evidence_for().is_empty());
    assert!(result.state.evidence_against().is_empty());
    let research_failures = result
        .state
        .incidents()
        .iter()
        .filter(|i| matches!(i, Incident::ResearchFailed { .. }))
        .count();
    assert_eq!(research_failures, 4);
}

#[tokio::test]
async fn test_accept_without_verdict_is_recovered() {
    let judge = ScriptedModel::new(&[
        r#"{"decision": "accept"}"#,
        r#"{"decision": "accept", "verdict": "Mixed.", "confidence": "medium"}"#,
    ]);
    let runner = runner(
        3,
        ScriptedModel::new(&["reforms", "more reforms"]),
        RecordingLookup::new(false),
        ScriptedModel::new(&["wars", "more wars"]),
        RecordingLookup::new(false),
        judge,
    );

    let result = runner.run("Napoleon").await.unwrap();

    assert!(!result.is_forced());
    assert_eq!(result.state.round(), 2);
    assert!(result.state.incidents().iter().any(|i| matches!(
        i,
        Incident::ProtocolViolation {
            round: 1,
            violation: ProtocolViolation::AcceptWithoutVerdict
        }
    )));
}
