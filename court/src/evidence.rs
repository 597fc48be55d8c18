//! Evidence store: admits a finding only when it is novel.
//!
//! Two indexes guard admission:
//! - content hashes, global across both sides and every round;
//! - source identities, per side by default so each biased side may cite a
//!   source the other side already used (see [`SourceDedupPolicy`]).
//!
//! Nothing is ever removed. Both indexes grow monotonically for the
//! lifetime of a trial.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One of the two opposing research perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Favorable side.
    For,
    /// Critical side.
    Against,
}

impl Side {
    /// Both sides, in merge order.
    pub const BOTH: [Side; 2] = [Side::For, Side::Against];
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::For => write!(f, "for"),
            Self::Against => write!(f, "against"),
        }
    }
}

/// Opaque, comparable provenance of a finding (e.g. a canonical page title).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLAKE3 digest (hex) of normalized evidence text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `text` after [`normalize`].
    pub fn of(text: &str) -> Self {
        Self(blake3::hash(normalize(text).as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Collapse whitespace runs, strip surrounding whitespace and case-fold.
///
/// Whitespace and case variants of the same text hash identically.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A single admitted finding. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Trimmed finding text as supplied by the research provider.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    pub content_hash: ContentHash,
    pub side: Side,
    /// Round (1-indexed) in which the item was admitted.
    pub round: u32,
}

/// Why a finding was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateContent,
    DuplicateSource,
    Empty,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateContent => write!(f, "duplicate_content"),
            Self::DuplicateSource => write!(f, "duplicate_source"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Result of [`EvidenceStore::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitResult {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl AdmitResult {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn rejected(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

/// Scope of source-identity deduplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDedupPolicy {
    /// A source may be cited once per side.
    #[default]
    PerSide,
    /// A source may be cited once in the whole trial.
    Global,
}

/// Deduplicated evidence for both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceStore {
    evidence_for: Vec<EvidenceItem>,
    evidence_against: Vec<EvidenceItem>,
    seen_content_hashes: BTreeSet<ContentHash>,
    seen_source_ids: BTreeMap<Side, BTreeSet<SourceId>>,
    source_dedup: SourceDedupPolicy,
}

impl EvidenceStore {
    pub fn new(source_dedup: SourceDedupPolicy) -> Self {
        Self {
            source_dedup,
            ..Self::default()
        }
    }

    /// Admit a finding for `side` if it is novel.
    ///
    /// Checks run in order: empty text, content hash, source identity. On
    /// acceptance the item is appended and both indexes are updated in the
    /// same call, so there is no partially applied admission.
    pub fn admit(
        &mut self,
        side: Side,
        raw_text: &str,
        source_id: Option<SourceId>,
        round: u32,
    ) -> AdmitResult {
        let text = raw_text.trim();
        if text.is_empty() {
            return AdmitResult::rejected(RejectReason::Empty);
        }

        let content_hash = ContentHash::of(text);
        if self.seen_content_hashes.contains(&content_hash) {
            debug!(%side, hash = %content_hash.as_str(), "Duplicate content rejected");
            return AdmitResult::rejected(RejectReason::DuplicateContent);
        }

        let source_id = source_id.filter(|id| !id.as_str().trim().is_empty());
        if let Some(id) = &source_id {
            if self.source_seen(side, id) {
                debug!(%side, source = %id, "Duplicate source rejected");
                return AdmitResult::rejected(RejectReason::DuplicateSource);
            }
        }

        self.seen_content_hashes.insert(content_hash.clone());
        if let Some(id) = &source_id {
            self.seen_source_ids
                .entry(side)
                .or_default()
                .insert(id.clone());
        }

        let item = EvidenceItem {
            text: text.to_string(),
            source_id,
            content_hash,
            side,
            round,
        };
        match side {
            Side::For => self.evidence_for.push(item),
            Side::Against => self.evidence_against.push(item),
        }
        AdmitResult::accepted()
    }

    fn source_seen(&self, side: Side, id: &SourceId) -> bool {
        let sides: &[Side] = match self.source_dedup {
            SourceDedupPolicy::PerSide => &[side],
            SourceDedupPolicy::Global => &Side::BOTH,
        };
        sides.iter().any(|s| {
            self.seen_source_ids
                .get(s)
                .is_some_and(|seen| seen.contains(id))
        })
    }

    /// Items admitted for `side`, in admission order.
    pub fn items(&self, side: Side) -> &[EvidenceItem] {
        match side {
            Side::For => &self.evidence_for,
            Side::Against => &self.evidence_against,
        }
    }

    pub fn evidence_for(&self) -> &[EvidenceItem] {
        &self.evidence_for
    }

    pub fn evidence_against(&self) -> &[EvidenceItem] {
        &self.evidence_against
    }

    /// All items, favorable side first.
    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.evidence_for.iter().chain(self.evidence_against.iter())
    }

    pub fn len(&self) -> usize {
        self.evidence_for.len() + self.evidence_against.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seen_content_hashes(&self) -> &BTreeSet<ContentHash> {
        &self.seen_content_hashes
    }

    /// Sources already cited by `side`.
    pub fn seen_sources(&self, side: Side) -> impl Iterator<Item = &SourceId> {
        self.seen_source_ids.get(&side).into_iter().flatten()
    }
}
