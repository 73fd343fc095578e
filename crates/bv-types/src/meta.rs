//! Per-request metadata shipped inside the response envelope.
//!
//! Everything here is a tagged record with an explicit field set; there is
//! deliberately no catch-all map. `stage_ms` uses a `BTreeMap` so the
//! serialized form is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request identity and snapshot binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMeta {
    pub request_id: String,
    pub trace_id: String,
    pub snapshot_etag: String,
}

/// Whether the model is invoked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    On,
    Off,
}

/// Effective model policy for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmPolicy {
    pub mode: LlmMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// The policy snapshot the request ran under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyMeta {
    pub llm: LlmPolicy,
    pub selector_policy_id: String,
    pub allowed_ids_policy: String,
    pub gateway_version: String,
}

/// Per-stage deadlines, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageTimeoutsMs {
    pub resolve: u64,
    pub expand: u64,
    pub enrich: u64,
    pub llm: u64,
    pub validate: u64,
    pub render: u64,
}

/// Byte and item budgets the selector ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Budgets {
    pub max_prompt_bytes: usize,
    pub min_evidence_items: usize,
    pub soft_threshold_bytes: usize,
    pub stage_timeouts_ms: StageTimeoutsMs,
}

/// Content fingerprints, each `sha256:<64 hex>` over canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fingerprints {
    pub prompt_fp: String,
    pub bundle_fp: String,
    pub graph_fp: String,
    pub allowed_ids_fp: String,
    pub policy_fp: String,
    pub schema_fp: String,
}

/// Evidence counts at each stage of the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceCounts {
    pub pool: usize,
    pub prompt_included: usize,
    pub payload_included: usize,
    pub dropped: usize,
}

/// An id excluded from the prompt, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludedId {
    pub id: String,
    pub reason: String,
}

/// Where the payload evidence was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSource {
    Pool,
    Prompt,
}

/// Id sets at each stage of the funnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceSets {
    pub pool_ids: Vec<String>,
    pub prompt_included_ids: Vec<String>,
    pub prompt_excluded_ids: Vec<ExcludedId>,
    pub payload_included_ids: Vec<String>,
    pub payload_source: PayloadSource,
}

/// What the selector saw and shipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionMetrics {
    pub total_neighbors_found: usize,
    pub final_evidence_count: usize,
    pub bundle_size_bytes: usize,
    pub selector_model_id: String,
}

/// One truncation pass record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TruncationPass {
    pub tokens: usize,
    pub limit: usize,
    pub action: String,
}

/// Whether and how the selector truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TruncationMetrics {
    pub selector_truncation: bool,
    #[serde(default)]
    pub passes: Vec<TruncationPass>,
}

/// Wall-clock accounting and fallback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeMeta {
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub retries: u32,
    pub latency_ms: u64,
    pub stage_ms: BTreeMap<String, u64>,
}

/// The validator verdict shipped with the response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// The complete meta block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaInfo {
    pub request: RequestMeta,
    pub policy: PolicyMeta,
    pub budgets: Budgets,
    pub fingerprints: Fingerprints,
    pub evidence_counts: EvidenceCounts,
    pub evidence_sets: EvidenceSets,
    pub selection_metrics: SelectionMetrics,
    pub truncation_metrics: TruncationMetrics,
    pub runtime: RuntimeMeta,
    pub validator: ValidatorReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_mode_wire_names() {
        assert_eq!(serde_json::to_string(&LlmMode::On).unwrap(), "\"on\"");
        assert_eq!(serde_json::to_string(&LlmMode::Off).unwrap(), "\"off\"");
    }

    #[test]
    fn test_payload_source_wire_names() {
        assert_eq!(serde_json::to_string(&PayloadSource::Pool).unwrap(), "\"pool\"");
        assert_eq!(
            serde_json::to_string(&PayloadSource::Prompt).unwrap(),
            "\"prompt\""
        );
    }

    #[test]
    fn test_stage_ms_serializes_in_key_order() {
        let mut stage_ms = BTreeMap::new();
        stage_ms.insert("resolve".to_string(), 12);
        stage_ms.insert("expand".to_string(), 30);
        let runtime = RuntimeMeta {
            fallback_used: false,
            fallback_reason: None,
            retries: 0,
            latency_ms: 42,
            stage_ms,
        };
        let json = serde_json::to_string(&runtime).unwrap();
        let expand_pos = json.find("expand").unwrap();
        let resolve_pos = json.find("resolve").unwrap();
        assert!(expand_pos < resolve_pos);
    }

    #[test]
    fn test_unknown_meta_fields_rejected() {
        let raw = r#"{"ok":true,"errors":[],"warnings":[]}"#;
        assert!(serde_json::from_str::<ValidatorReport>(raw).is_err());
    }
}
