//! Deterministic selection and size-bounded truncation.
//!
//! Scoring is `w_r · recency + w_s · similarity` with fixed weights;
//! `recency = 1/(1+Δdays)` against the anchor timestamp, similarity is
//! Jaccard over normalized tags unless both records carry an `x-extra`
//! embedding, in which case cosine is used. The truncation loop pops the
//! worst-scored item until the canonical bundle fits `MAX_PROMPT_BYTES` or
//! the minimum item floor is reached, then recomputes `allowed_ids` so the
//! union invariant holds over the trimmed bundle.

use chrono::{DateTime, Utc};
use serde_json::Value;

use bv_types::{
    normalize_tag, Anchor, EvidenceBundle, EvidenceCounts, EvidenceSets, ExcludedId,
    PayloadSource, SelectionMetrics, TruncationMetrics, TruncationPass,
};

use crate::config::Settings;
use crate::resolver::vector::cosine;

/// Fixed recency weight of the baseline selector policy.
const W_RECENCY: f64 = 0.7;
/// Fixed similarity weight of the baseline selector policy.
const W_SIMILARITY: f64 = 0.3;

/// Exclusion reason recorded for every size-pruned item.
const REASON_SIZE_BUDGET: &str = "size_budget";

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub max_prompt_bytes: usize,
    pub soft_threshold_bytes: usize,
    pub min_evidence_items: usize,
    pub selector_model_id: String,
}

impl SelectorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_prompt_bytes: settings.max_prompt_bytes,
            soft_threshold_bytes: settings.soft_threshold_bytes,
            min_evidence_items: settings.min_evidence_items,
            selector_model_id: settings.selector_model_id.clone(),
        }
    }
}

/// The selector verdict: the trimmed bundle plus everything meta needs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Selection {
    pub bundle: EvidenceBundle,
    pub selection_metrics: SelectionMetrics,
    pub truncation_metrics: TruncationMetrics,
    pub evidence_counts: EvidenceCounts,
    pub evidence_sets: EvidenceSets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Event,
    Preceding,
    Succeeding,
}

struct Candidate {
    kind: Kind,
    id: String,
    score: f64,
    timestamp: DateTime<Utc>,
}

/// Byte length of the canonical bundle rendering.
pub fn bundle_size_bytes(bundle: &EvidenceBundle) -> usize {
    let value = serde_json::to_value(bundle).unwrap_or(Value::Null);
    bv_canon::canonical_len(&value)
}

pub fn select(mut bundle: EvidenceBundle, cfg: &SelectorConfig) -> Selection {
    let pool_ids = bundle.allowed_ids.clone();
    let total_neighbors_found = bundle.item_count();

    let mut excluded: Vec<ExcludedId> = Vec::new();
    let mut passes: Vec<TruncationPass> = Vec::new();
    let mut size = bundle_size_bytes(&bundle);
    let mut truncated = false;

    if size > cfg.soft_threshold_bytes {
        // Single unified drop order over events and both transition sides,
        // worst first. Scores are fixed per item, so the order is computed
        // once up front.
        let mut drop_order = candidates(&bundle);
        drop_order.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(b.id.cmp(&a.id))
        });
        let mut drop_order = drop_order.into_iter();

        while size > cfg.max_prompt_bytes {
            if bundle.item_count() <= cfg.min_evidence_items {
                passes.push(TruncationPass {
                    tokens: size,
                    limit: cfg.max_prompt_bytes,
                    action: "min_items_reached".to_string(),
                });
                break;
            }
            let Some(worst) = drop_order.next() else {
                break;
            };
            remove_item(&mut bundle, &worst);
            bundle.refresh_allowed_ids();
            size = bundle_size_bytes(&bundle);
            truncated = true;
            excluded.push(ExcludedId {
                id: worst.id,
                reason: REASON_SIZE_BUDGET.to_string(),
            });
            passes.push(TruncationPass {
                tokens: size,
                limit: cfg.max_prompt_bytes,
                action: "drop_worst".to_string(),
            });
        }
    }

    let prompt_included_ids = bundle.allowed_ids.clone();
    Selection {
        selection_metrics: SelectionMetrics {
            total_neighbors_found,
            final_evidence_count: bundle.item_count(),
            bundle_size_bytes: size,
            selector_model_id: cfg.selector_model_id.clone(),
        },
        truncation_metrics: TruncationMetrics {
            selector_truncation: truncated,
            passes,
        },
        evidence_counts: EvidenceCounts {
            pool: pool_ids.len(),
            prompt_included: prompt_included_ids.len(),
            payload_included: prompt_included_ids.len(),
            dropped: excluded.len(),
        },
        evidence_sets: EvidenceSets {
            pool_ids,
            prompt_included_ids: prompt_included_ids.clone(),
            prompt_excluded_ids: excluded,
            payload_included_ids: prompt_included_ids,
            payload_source: PayloadSource::Prompt,
        },
        bundle,
    }
}

fn candidates(bundle: &EvidenceBundle) -> Vec<Candidate> {
    let anchor = &bundle.anchor;
    let mut out = Vec::with_capacity(bundle.item_count());
    for e in &bundle.events {
        out.push(Candidate {
            kind: Kind::Event,
            id: e.id.clone(),
            score: item_score(anchor, e.timestamp, &e.tags, embedding_of(&e.x_extra)),
            timestamp: e.timestamp,
        });
    }
    for t in &bundle.transitions.preceding {
        out.push(Candidate {
            kind: Kind::Preceding,
            id: t.id.clone(),
            score: item_score(anchor, t.timestamp, &t.tags, embedding_of(&t.x_extra)),
            timestamp: t.timestamp,
        });
    }
    for t in &bundle.transitions.succeeding {
        out.push(Candidate {
            kind: Kind::Succeeding,
            id: t.id.clone(),
            score: item_score(anchor, t.timestamp, &t.tags, embedding_of(&t.x_extra)),
            timestamp: t.timestamp,
        });
    }
    out
}

fn remove_item(bundle: &mut EvidenceBundle, candidate: &Candidate) {
    match candidate.kind {
        Kind::Event => bundle.events.retain(|e| e.id != candidate.id),
        Kind::Preceding => bundle
            .transitions
            .preceding
            .retain(|t| t.id != candidate.id),
        Kind::Succeeding => bundle
            .transitions
            .succeeding
            .retain(|t| t.id != candidate.id),
    }
}

/// Score one candidate against the anchor.
pub fn item_score(
    anchor: &Anchor,
    timestamp: DateTime<Utc>,
    tags: &[String],
    embedding: Option<Vec<f32>>,
) -> f64 {
    let delta_days = (anchor.timestamp - timestamp).num_days().unsigned_abs() as f64;
    let recency = 1.0 / (1.0 + delta_days);

    let similarity = match (embedding_of(&anchor.x_extra), embedding) {
        (Some(a), Some(b)) => cosine(&a, &b).max(0.0),
        _ => jaccard(&anchor_tags(anchor), tags),
    };

    W_RECENCY * recency + W_SIMILARITY * similarity
}

/// The anchor's tag set: `x-extra.tags` when the ingest provided one,
/// otherwise the normalized title tokens.
fn anchor_tags(anchor: &Anchor) -> Vec<String> {
    if let Some(tags) = anchor.x_extra.get("tags").and_then(|v| v.as_array()) {
        let mut out: Vec<String> = tags
            .iter()
            .filter_map(|t| t.as_str())
            .map(normalize_tag)
            .filter(|t| !t.is_empty())
            .collect();
        out.sort();
        out.dedup();
        return out;
    }
    let mut out: Vec<String> = anchor
        .title
        .split_whitespace()
        .map(normalize_tag)
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn embedding_of(x_extra: &serde_json::Map<String, Value>) -> Option<Vec<f32>> {
    let values = x_extra.get("embedding")?.as_array()?;
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        out.push(v.as_f64()? as f32);
    }
    Some(out)
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}
