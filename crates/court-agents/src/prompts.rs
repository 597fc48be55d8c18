//! System prompt constants and prompt builders for each trial role.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes.
//! Telemetry records it so a verdict can be traced to the prompts that produced it.

use court::{ArbitrationRequest, BoundedItem, ResearchRequest, Side};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Characters of each evidence item shown to the judge.
pub const JUDGE_ITEM_CHARS: usize = 2_000;

/// Advocate preamble: writes search queries for supporting evidence.
pub const ADVOCATE_PREAMBLE: &str = "\
You are the advocate in an evidence-based trial about a historical topic. \
Your job is to find documented evidence that supports a favorable assessment: \
achievements, contributions, legacy, reforms and innovations.

You do not argue. You write ONE encyclopedia search query per request that is \
likely to surface such evidence. Prefer concrete names, events and places over \
adjectives. Never repeat a query you have already used.

Return ONLY the search query, on a single line, without quotes or commentary.";

/// Critic preamble: writes search queries for critical evidence.
pub const CRITIC_PREAMBLE: &str = "\
You are the critic in an evidence-based trial about a historical topic. \
Your job is to find documented evidence that supports a critical assessment: \
controversies, failures, casualties, criticism, scandals and corruption.

You do not argue. You write ONE encyclopedia search query per request that is \
likely to surface such evidence. Prefer concrete names, events and places over \
adjectives. Never repeat a query you have already used.

Return ONLY the search query, on a single line, without quotes or commentary.";

/// Judge preamble: weighs both evidence sets and returns a JSON decision.
pub const JUDGE_PREAMBLE: &str = "\
You are the impartial judge of an evidence-based trial about a historical topic. \
Two researchers collected evidence: one for a favorable assessment, one for a \
critical assessment. Each side is biased on purpose. Weigh only what the evidence \
shows.

Either ACCEPT the record and render a verdict, or REJECT it and say what is \
missing so the researchers can run another round.

Reply with ONE JSON object and nothing else:
{
  \"decision\": \"accept\" | \"reject\",
  \"verdict\": \"balanced verdict text (required on accept)\",
  \"confidence\": \"low\" | \"medium\" | \"high\",
  \"key_points_for\": [\"...\"],
  \"key_points_against\": [\"...\"],
  \"feedback\": \"what is missing (required on reject)\",
  \"queries_for\": [\"search queries for the favorable side\"],
  \"queries_against\": [\"search queries for the critical side\"]
}

On reject, give at least one query for at least one side.";

/// Preamble for the research agent on `side`.
pub fn researcher_preamble(side: Side) -> &'static str {
    match side {
        Side::For => ADVOCATE_PREAMBLE,
        Side::Against => CRITIC_PREAMBLE,
    }
}

/// Prompt asking a research agent for its next search query.
pub fn query_prompt(request: &ResearchRequest) -> String {
    let mut prompt = format!(
        "TOPIC: {}\nFOCUS: {}\nROUND: {}\n",
        request.topic, request.bias, request.round
    );
    if let Some(feedback) = request.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
        prompt.push_str(&format!("\nJUDGE FEEDBACK:\n{}\n", feedback.trim()));
    }
    if !request.used_queries.is_empty() {
        prompt.push_str("\nALREADY USED (do not repeat):\n");
        for query in &request.used_queries {
            prompt.push_str(&format!("- {query}\n"));
        }
    }
    prompt.push_str("\nReturn ONLY the search query.");
    prompt
}

/// Number evidence items as `[i] text`, each clipped to `max_chars`.
pub fn format_evidence(items: &[BoundedItem], max_chars: usize) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let text: String = item.text.chars().take(max_chars).collect();
            format!("[{}] {}", i + 1, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt asking the judge to deliberate over the bounded evidence.
pub fn deliberation_prompt(request: &ArbitrationRequest) -> String {
    let mut prompt = format!(
        "TOPIC: {}\n\n\
         EVIDENCE FOR (favorable):\n{}\n\n\
         EVIDENCE AGAINST (critical):\n{}\n\n\
         CURRENT ROUND: {} of {}\n",
        request.topic,
        format_evidence(request.evidence.items(Side::For), JUDGE_ITEM_CHARS),
        format_evidence(request.evidence.items(Side::Against), JUDGE_ITEM_CHARS),
        request.round,
        request.max_rounds,
    );
    if request.is_final_round() {
        prompt.push_str(
            "\nThis is the FINAL round. You MUST accept and render a verdict \
             from the evidence available, stating its limits.\n",
        );
    } else {
        prompt.push_str(
            "\nAccept only if both sides are covered well enough for a balanced verdict; \
             otherwise reject with feedback and queries.\n",
        );
    }
    prompt
}
