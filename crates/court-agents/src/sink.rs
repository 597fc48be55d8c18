//! Durable storage for completed trials.
//!
//! `FileSink` writes two files per trial into the output directory:
//! `verdict_<topic>_<timestamp>_<trial id>.json` (the full [`TrialResult`])
//! and a plain-text report with the same stem. The trial id prefix keeps two
//! trials on one topic finishing in the same second apart.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::info;

use court::{Incident, Side, TrialResult};

static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("NON_ALNUM_RE regex should compile"));

/// Longest topic slug used in a file name.
const MAX_SLUG_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize trial result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persists a completed trial.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Returns the paths written.
    async fn persist(&self, result: &TrialResult) -> Result<Vec<PathBuf>, SinkError>;
}

/// Writes JSON and text reports into a directory.
/// Hex chars of the trial id carried in file names.
const TRIAL_ID_CHARS: usize = 8;

pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File stem for `result`, without extension.
    pub fn stem(result: &TrialResult) -> String {
        let id = result.trial_id.simple().to_string();
        format!(
            "verdict_{}_{}_{}",
            safe_topic(result.state.topic()),
            result.finished_at.format("%Y%m%d_%H%M%S"),
            &id[..TRIAL_ID_CHARS]
        )
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), SinkError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl ResultSink for FileSink {
    async fn persist(&self, result: &TrialResult) -> Result<Vec<PathBuf>, SinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SinkError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let stem = Self::stem(result);
        let json_path = self.dir.join(format!("{stem}.json"));
        let text_path = self.dir.join(format!("{stem}.txt"));

        let json = serde_json::to_vec_pretty(result)?;
        write_file(&json_path, &json).await?;
        write_file(&text_path, render_report(result).as_bytes()).await?;

        info!(
            json = %json_path.display(),
            report = %text_path.display(),
            "Saved verdict"
        );
        Ok(vec![json_path, text_path])
    }
}

/// Lowercased topic with every run of non-alphanumerics replaced by `_`.
pub fn safe_topic(topic: &str) -> String {
    let lower = topic.to_lowercase();
    let slug = NON_ALNUM_RE.replace_all(&lower, "_");
    let slug: String = slug.trim_matches('_').chars().take(MAX_SLUG_CHARS).collect();
    if slug.is_empty() {
        "trial".to_string()
    } else {
        slug
    }
}

/// Plain-text trial report.
pub fn render_report(result: &TrialResult) -> String {
    let state = &result.state;
    let verdict = &result.verdict;
    let mut out = String::new();

    let _ = writeln!(out, "TRIAL VERDICT");
    let _ = writeln!(out, "=============");
    let _ = writeln!(out, "Topic:      {}", state.topic());
    let _ = writeln!(out, "Opened:     {}", state.created_at().format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Date:       {}", result.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Trial:      {}", result.trial_id);
    let _ = writeln!(out, "Rounds:     {} of {}", state.round(), state.max_rounds());
    let _ = writeln!(out, "Confidence: {}", verdict.confidence);
    let _ = writeln!(out, "Forced:     {}", if verdict.forced { "yes" } else { "no" });

    for (side, title) in [(Side::For, "CASE FOR"), (Side::Against, "CASE AGAINST")] {
        let items = state.evidence().items(side);
        let _ = writeln!(out, "\n{title} ({} items)", items.len());
        for (i, item) in items.iter().enumerate() {
            let _ = write!(out, "[{}] {}", i + 1, item.text);
            if let Some(source) = &item.source_id {
                let _ = write!(out, " ({source})");
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "\nVERDICT\n{}", verdict.verdict_text);
    for (title, points) in [
        ("KEY POINTS FOR", &verdict.key_points_for),
        ("KEY POINTS AGAINST", &verdict.key_points_against),
    ] {
        if points.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{title}");
        for point in points {
            let _ = writeln!(out, "- {point}");
        }
    }

    if !state.incidents().is_empty() {
        let _ = writeln!(out, "\nINCIDENTS");
        for incident in state.incidents() {
            let _ = writeln!(out, "- {}", describe_incident(incident));
        }
    }
    out
}

fn describe_incident(incident: &Incident) -> String {
    match incident {
        Incident::ResearchFailed { round, side, error } => {
            format!("round {round}: research for {side} failed: {error}")
        }
        Incident::ArbitrationFailed { round, error } => {
            format!("round {round}: arbitration failed: {error}")
        }
        Incident::ProtocolViolation { round, violation } => {
            format!("round {round}: protocol violation: {violation}")
        }
        Incident::RoundCeilingOverride { round } => {
            format!("round {round}: round limit reached, verdict forced")
        }
    }
}
