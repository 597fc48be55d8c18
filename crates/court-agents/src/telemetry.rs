//! Structured telemetry for completed trials.
//!
//! One JSON object per trial is appended to `court-telemetry.jsonl` in the
//! output directory. Writing is best-effort: failures are logged, never
//! returned.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use court::{DispatchMode, Incident, Side, TrialResult};

use crate::prompts::PROMPT_VERSION;

/// Current schema version for telemetry lines.
/// Bump when adding/removing/renaming fields.
pub const TELEMETRY_SCHEMA_VERSION: u8 = 1;

/// How the trial reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The arbiter accepted on its own.
    Accepted,
    /// The round ceiling forced acceptance.
    Forced,
}

/// Per-round admissions and failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTelemetry {
    pub round: u32,
    pub added_for: usize,
    pub added_against: usize,
    pub rejected: usize,
    pub errors: usize,
    pub queries: usize,
    pub duration_ms: u64,
}

/// One telemetry line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialTelemetry {
    pub schema_version: u8,
    pub trial_id: Uuid,
    pub topic: String,
    pub rounds: u32,
    pub max_rounds: u32,
    pub outcome: TrialOutcome,
    pub confidence: String,
    pub evidence_for: usize,
    pub evidence_against: usize,
    pub per_round: Vec<RoundTelemetry>,
    pub incidents: usize,
    /// Incidents that were research failures.
    pub research_failures: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub dispatch: DispatchMode,
    pub prompt_version: String,
}

impl TrialTelemetry {
    pub fn from_result(result: &TrialResult, dispatch: DispatchMode) -> Self {
        let state = &result.state;
        let per_round = state
            .rounds_log()
            .iter()
            .map(|r| RoundTelemetry {
                round: r.round,
                added_for: r.added_for,
                added_against: r.added_against,
                rejected: r.rejected,
                errors: r.errors.len(),
                queries: Side::BOTH
                    .iter()
                    .map(|side| r.queries.get(side).map_or(0, Vec::len))
                    .sum(),
                duration_ms: r.duration_ms,
            })
            .collect();
        let research_failures = state
            .incidents()
            .iter()
            .filter(|i| matches!(i, Incident::ResearchFailed { .. }))
            .count();

        Self {
            schema_version: TELEMETRY_SCHEMA_VERSION,
            trial_id: result.trial_id,
            topic: state.topic().to_string(),
            rounds: state.round(),
            max_rounds: state.max_rounds(),
            outcome: if result.is_forced() {
                TrialOutcome::Forced
            } else {
                TrialOutcome::Accepted
            },
            confidence: result.verdict.confidence.to_string(),
            evidence_for: state.evidence_for().len(),
            evidence_against: state.evidence_against().len(),
            per_round,
            incidents: state.incidents().len(),
            research_failures,
            duration_ms: result.duration_ms(),
            timestamp: Utc::now(),
            dispatch,
            prompt_version: PROMPT_VERSION.to_string(),
        }
    }
}

/// Append one telemetry line to `path`, creating the file if needed.
///
/// Each line is a complete JSON object (JSONL format) for easy streaming analysis.
pub fn append_telemetry(telemetry: &TrialTelemetry, path: &Path) {
    match serde_json::to_string(telemetry) {
        Ok(json) => {
            use std::io::Write;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Failed to create telemetry directory: {e}");
                    return;
                }
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended trial telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
