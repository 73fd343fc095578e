//! Effective policy snapshot and per-request context.
//!
//! There is no process-global policy state: each request carries an
//! immutable `RequestContext` assembled before the pipeline starts, and the
//! policy fingerprint is computed once from the effective snapshot.

use bv_types::{Budgets, Intent, LlmPolicy, PolicyMeta};
use uuid::Uuid;

use crate::config::Settings;

/// Identifier of the deterministic scoring + tie-break procedure in use.
pub const SELECTOR_POLICY_ID: &str = "recency-similarity-v1";

/// Identifier of the allowed-ids computation policy (exact union).
pub const ALLOWED_IDS_POLICY: &str = "anchor-events-transitions-union-v1";

/// The policy a request runs under. Immutable once built.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub llm: LlmPolicy,
    pub selector_policy_id: String,
    pub allowed_ids_policy: String,
    pub gateway_version: String,
}

impl PolicySnapshot {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            llm: LlmPolicy {
                mode: settings.llm.mode,
                model_id: Some(settings.llm.model_id.clone()),
            },
            selector_policy_id: SELECTOR_POLICY_ID.to_string(),
            allowed_ids_policy: ALLOWED_IDS_POLICY.to_string(),
            gateway_version: settings.gateway_version.clone(),
        }
    }

    pub fn to_meta(&self) -> PolicyMeta {
        PolicyMeta {
            llm: self.llm.clone(),
            selector_policy_id: self.selector_policy_id.clone(),
            allowed_ids_policy: self.allowed_ids_policy.clone(),
            gateway_version: self.gateway_version.clone(),
        }
    }

    /// `sha256:` fingerprint over the canonical policy snapshot.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::to_value(self.to_meta()).unwrap_or_default();
        bv_canon::fingerprint_value(&value)
    }
}

/// Everything a single request needs, fixed at admission time.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: String,
    pub snapshot_etag: String,
    pub intent: Intent,
    pub question: Option<String>,
    pub input: String,
    pub policy: PolicySnapshot,
    pub policy_fp: String,
    pub schema_fp: String,
    pub budgets: Budgets,
}

impl RequestContext {
    /// Allocate a request id when the client did not supply one.
    pub fn new_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Derive a trace id from an incoming `traceparent` header, or mint one.
    pub fn trace_id_from(traceparent: Option<&str>) -> String {
        traceparent
            .and_then(|tp| tp.split('-').nth(1))
            .filter(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
    }
}
