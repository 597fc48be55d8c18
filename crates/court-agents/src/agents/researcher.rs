//! Biased research agents (advocate and critic).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::providers::openai;
use tracing::{debug, info, warn};

use court::{
    CollaboratorError, ContentLookup, Finding, ResearchProvider, ResearchReport, ResearchRequest,
    Side,
};

use super::{OaiAgent, TextModel};
use crate::prompts;

/// Words of judge feedback carried into a fallback query.
const FALLBACK_FEEDBACK_WORDS: usize = 12;

/// Characters trimmed from both ends of a model-written query.
const QUERY_TRIM: &[char] = &['"', '\'', '`', '“', '”', '‘', '’', ' ', '\t'];

/// Build the query-writing agent for `side`.
///
/// NO tools: the agent only writes a search query; the lookup runs here.
pub fn build_researcher(client: &openai::CompletionsClient, model: &str, side: Side) -> OaiAgent {
    let (name, description) = match side {
        Side::For => ("advocate", "Writes search queries for favorable evidence."),
        Side::Against => ("critic", "Writes search queries for critical evidence."),
    };
    client
        .agent(model)
        .name(name)
        .description(description)
        .preamble(prompts::researcher_preamble(side))
        .temperature(0.7)
        .build()
}

/// Research provider that plans queries with an LLM and answers them with a
/// content lookup.
pub struct LlmResearcher {
    side: Side,
    model: Arc<dyn TextModel>,
    lookup: Arc<dyn ContentLookup>,
    max_queries_per_round: usize,
}

impl LlmResearcher {
    pub fn new(side: Side, model: Arc<dyn TextModel>, lookup: Arc<dyn ContentLookup>) -> Self {
        Self {
            side,
            model,
            lookup,
            max_queries_per_round: 2,
        }
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries_per_round = max_queries.max(1);
        self
    }

    /// Queries to issue this round.
    ///
    /// Unused suggestions come first. The model is asked only when none
    /// remain, and a deterministic fallback covers a failed or empty reply.
    pub async fn plan_queries(&self, request: &ResearchRequest) -> Vec<String> {
        let mut seen: HashSet<String> = request
            .used_queries
            .iter()
            .map(|q| q.to_lowercase())
            .collect();
        let mut queries = Vec::new();
        for suggestion in &request.suggested_queries {
            if queries.len() >= self.max_queries_per_round {
                break;
            }
            let query = collapse_whitespace(suggestion);
            if !query.is_empty() && seen.insert(query.to_lowercase()) {
                queries.push(query);
            }
        }
        if !queries.is_empty() {
            return queries;
        }

        let query = match self.model.complete(&prompts::query_prompt(request)).await {
            Ok(reply) => with_topic(&sanitize_query(&reply), &request.topic),
            Err(e) => {
                warn!(side = %self.side, error = %e, "Query generation failed, using fallback");
                String::new()
            }
        };
        if query.is_empty() {
            vec![fallback_query(
                &request.topic,
                &request.bias,
                request.feedback.as_deref(),
            )]
        } else {
            vec![query]
        }
    }
}

#[async_trait]
impl ResearchProvider for LlmResearcher {
    async fn research(&self, request: &ResearchRequest) -> Result<ResearchReport, CollaboratorError> {
        let queries = self.plan_queries(request).await;

        let mut findings: Vec<Finding> = Vec::new();
        let mut failures = 0;
        let mut last_error = None;
        for query in &queries {
            match self.lookup.lookup(query, &request.topic).await {
                Ok(hits) => {
                    debug!(side = %self.side, query = %query, hits = hits.len(), "Lookup returned");
                    findings.extend(hits);
                }
                Err(e) => {
                    warn!(side = %self.side, query = %query, error = %e, "Lookup failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures == queries.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        info!(
            side = %self.side,
            round = request.round,
            queries = queries.len(),
            findings = findings.len(),
            "Research complete"
        );
        Ok(ResearchReport::new(findings).with_queries(queries))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten a model reply into a single search query.
pub fn sanitize_query(raw: &str) -> String {
    let flat = raw.replace(['\r', '\n'], " ");
    collapse_whitespace(flat.trim_matches(QUERY_TRIM))
}

/// Prefix `query` with the quoted topic unless it already mentions it.
pub fn with_topic(query: &str, topic: &str) -> String {
    if query.is_empty() || query.to_lowercase().contains(&topic.to_lowercase()) {
        query.to_string()
    } else {
        format!("\"{topic}\" {query}")
    }
}

/// Deterministic query from the topic, bias keywords and judge feedback.
///
/// Bias keywords are the part of the descriptor after `:`, if any.
pub fn fallback_query(topic: &str, bias: &str, feedback: Option<&str>) -> String {
    let keywords = bias
        .split_once(':')
        .map_or(bias, |(_, rest)| rest)
        .replace(',', " ");
    let mut words: Vec<&str> = keywords.split_whitespace().collect();
    if let Some(feedback) = feedback {
        words.extend(feedback.split_whitespace().take(FALLBACK_FEEDBACK_WORDS));
    }
    if words.is_empty() {
        format!("\"{topic}\"")
    } else {
        format!("\"{topic}\" {}", words.join(" "))
    }
}
