//! Canonical prompt envelope assembly and content fingerprints.
//!
//! The envelope is rendered once into canonical bytes; `prompt_fp` is the
//! digest of exactly those bytes, so persisting and reloading
//! `envelope.json` reproduces the fingerprint byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bv_types::{EvidenceBundle, Fingerprints, Intent, SCHEMA_VERSION};

/// Output schema the model is instructed to produce.
pub const OUTPUT_SCHEMA: &str = "WhyDecisionAnswer@1";

/// Completion token ceiling passed in the envelope constraints.
pub const MAX_COMPLETION_TOKENS: u32 = 512;

/// Constraints block of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConstraints {
    pub max_tokens: u32,
    pub cite_from_allowed_ids_only: bool,
    pub output_schema: String,
}

impl Default for PromptConstraints {
    fn default() -> Self {
        Self {
            max_tokens: MAX_COMPLETION_TOKENS,
            cite_from_allowed_ids_only: true,
            output_schema: OUTPUT_SCHEMA.to_string(),
        }
    }
}

/// The canonical prompt envelope shipped to the model and persisted as
/// `envelope.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptEnvelope {
    pub intent: Intent,
    pub question: String,
    pub anchor: bv_types::Anchor,
    pub evidence: EvidenceBundle,
    pub allowed_ids: Vec<String>,
    pub schema_version: String,
    pub constraints: PromptConstraints,
}

/// An assembled envelope with its canonical bytes and all six fingerprints.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    pub envelope: PromptEnvelope,
    pub canonical: Vec<u8>,
    pub fingerprints: Fingerprints,
}

/// Assemble and fingerprint the envelope for one request.
///
/// `adjacency` is the flat one-hop neighborhood adjacency (for `graph_fp`);
/// `policy_fp` and `schema_fp` are computed elsewhere and carried through.
pub fn seal(
    intent: Intent,
    question: &str,
    bundle: &EvidenceBundle,
    adjacency: &Value,
    policy_fp: &str,
    schema_fp: &str,
) -> SealedEnvelope {
    let envelope = PromptEnvelope {
        intent,
        question: question.to_string(),
        anchor: bundle.anchor.clone(),
        evidence: bundle.clone(),
        allowed_ids: bundle.allowed_ids.clone(),
        schema_version: SCHEMA_VERSION.to_string(),
        constraints: PromptConstraints::default(),
    };

    let envelope_value = serde_json::to_value(&envelope).unwrap_or(Value::Null);
    let canonical = bv_canon::canonical_bytes(&envelope_value);

    let bundle_value = serde_json::to_value(bundle).unwrap_or(Value::Null);
    let allowed_ids_value = serde_json::to_value(&bundle.allowed_ids).unwrap_or(Value::Null);

    let fingerprints = Fingerprints {
        prompt_fp: bv_canon::fingerprint_bytes(&canonical),
        bundle_fp: bv_canon::fingerprint_value(&bundle_value),
        graph_fp: bv_canon::fingerprint_value(adjacency),
        allowed_ids_fp: bv_canon::fingerprint_value(&allowed_ids_value),
        policy_fp: policy_fp.to_string(),
        schema_fp: schema_fp.to_string(),
    };

    SealedEnvelope {
        envelope,
        canonical,
        fingerprints,
    }
}
