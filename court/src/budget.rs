//! Evidence budget: bounds the evidence handed to the arbiter.
//!
//! Items are truncated, never dropped. Each item is first capped at
//! `max_item_chars`; if the total still exceeds `max_total_chars`, items
//! are shortened oldest round first, each down to a small floor (never
//! more than an equal share of the total budget). The most recent round is
//! truncated last.
//! Lengths are counted in characters, not bytes.

use serde::{Deserialize, Serialize};

use crate::evidence::{EvidenceItem, EvidenceStore, Side, SourceId};

const TRUNCATION_MARK: char = '…';

/// Characters an item keeps when older rounds are squeezed.
const MIN_KEEP_CHARS: usize = 64;

/// Character limits applied to arbiter input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceBudget {
    /// Maximum characters across both sides.
    pub max_total_chars: usize,
    /// Maximum characters for any single item.
    pub max_item_chars: usize,
}

impl Default for EvidenceBudget {
    fn default() -> Self {
        Self {
            max_total_chars: 12_000,
            max_item_chars: 3_000,
        }
    }
}

/// An evidence item as presented to the arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedItem {
    pub side: Side,
    pub round: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    pub truncated: bool,
}

/// Both sides' evidence after the budget was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedEvidence {
    pub evidence_for: Vec<BoundedItem>,
    pub evidence_against: Vec<BoundedItem>,
}

impl BoundedEvidence {
    pub fn items(&self, side: Side) -> &[BoundedItem] {
        match side {
            Side::For => &self.evidence_for,
            Side::Against => &self.evidence_against,
        }
    }

    pub fn total_chars(&self) -> usize {
        self.evidence_for
            .iter()
            .chain(self.evidence_against.iter())
            .map(|item| item.text.chars().count())
            .sum()
    }
}

impl EvidenceBudget {
    /// Apply the budget to everything in `store`.
    pub fn apply(&self, store: &EvidenceStore) -> BoundedEvidence {
        let items: Vec<&EvidenceItem> = store.iter().collect();
        let limits = self.limits(&items);

        let mut bounded = BoundedEvidence::default();
        for (item, limit) in items.into_iter().zip(limits) {
            let (text, truncated) = truncate_chars(&item.text, limit);
            let entry = BoundedItem {
                side: item.side,
                round: item.round,
                text,
                source_id: item.source_id.clone(),
                truncated,
            };
            match item.side {
                Side::For => bounded.evidence_for.push(entry),
                Side::Against => bounded.evidence_against.push(entry),
            }
        }
        bounded
    }

    /// Per-item character limits, parallel to `items`.
    fn limits(&self, items: &[&EvidenceItem]) -> Vec<usize> {
        let mut limits: Vec<usize> = items
            .iter()
            .map(|item| item.text.chars().count().min(self.max_item_chars))
            .collect();

        let total: usize = limits.iter().sum();
        if total <= self.max_total_chars || items.is_empty() {
            return limits;
        }

        // At least one char per item, even past the total budget.
        let floor = MIN_KEEP_CHARS
            .min(self.max_total_chars / items.len())
            .max(1);
        let mut excess = total - self.max_total_chars;

        // Stable sort keeps admission order within a round.
        let mut oldest_first: Vec<usize> = (0..items.len()).collect();
        oldest_first.sort_by_key(|&i| items[i].round);

        for i in oldest_first {
            if excess == 0 {
                break;
            }
            let cut = limits[i].saturating_sub(floor).min(excess);
            limits[i] -= cut;
            excess -= cut;
        }
        limits
    }
}

/// Cut `text` to at most `limit` characters, marking the cut.
fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    if text.chars().count() <= limit {
        return (text.to_string(), false);
    }
    if limit == 0 {
        return (String::new(), true);
    }
    let mut out: String = text.chars().take(limit - 1).collect();
    out.truncate(out.trim_end().len());
    out.push(TRUNCATION_MARK);
    (out, true)
}
