//! The query surface: `POST /v3/query` (NDJSON stream) and the bundle
//! verify view `GET /v3/bundles/{request_id}`.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use bv_types::{is_anchor_ref, Budgets, Intent, ResponseEnvelope};

use crate::artifacts;
use crate::cache::SnapshotCache;
use crate::error::{GatewayError, Result};
use crate::policy::RequestContext;
use crate::state::AppState;

use super::headers::*;

/// How long a probed snapshot etag is trusted before re-probing.
const SNAPSHOT_PROBE_TTL: std::time::Duration = std::time::Duration::from_secs(5);

/// Body of `POST /v3/query`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub intent: Option<Intent>,
}

/// POST /v3/query — run the pipeline and stream NDJSON.
pub async fn post_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> Result<Response> {
    // Input: an anchor reference wins over free text.
    let input = match (&body.anchor, &body.question) {
        (Some(anchor), _) => {
            if !is_anchor_ref(anchor) {
                return Err(GatewayError::BadRequest(format!(
                    "anchor does not match <domain>#<slug>: {anchor}"
                )));
            }
            anchor.clone()
        }
        (None, Some(question)) if !question.trim().is_empty() => question.clone(),
        _ => {
            return Err(GatewayError::BadRequest(
                "request needs a question or an anchor".to_string(),
            ))
        }
    };

    // Snapshot precondition, checked before the stream opens.
    let snapshot_etag = current_snapshot(&state).await?;
    if let Some(client_etag) = header_str(&headers, X_SNAPSHOT_ETAG) {
        if client_etag != snapshot_etag {
            return Err(GatewayError::PreconditionFailed {
                client: client_etag.to_string(),
                server: snapshot_etag,
            });
        }
    }

    // Policy key gate: a mismatching key gets the server fingerprint back
    // for a one-shot retry.
    if let Some(policy_key) = header_str(&headers, X_POLICY_KEY) {
        if policy_key != state.policy_fp {
            return Err(GatewayError::PolicyMismatch {
                policy_fp: state.policy_fp.clone(),
            });
        }
    }

    let request_id = header_str(&headers, X_REQUEST_ID)
        .map(str::to_string)
        .unwrap_or_else(RequestContext::new_request_id);
    let ctx = RequestContext {
        request_id: request_id.clone(),
        trace_id: RequestContext::trace_id_from(header_str(&headers, TRACEPARENT)),
        snapshot_etag: snapshot_etag.clone(),
        intent: body.intent.unwrap_or_default(),
        question: body.question.clone(),
        input,
        policy: (*state.policy).clone(),
        policy_fp: state.policy_fp.clone(),
        schema_fp: state.schema_fp.clone(),
        budgets: Budgets {
            max_prompt_bytes: state.settings.max_prompt_bytes,
            min_evidence_items: state.settings.min_evidence_items,
            soft_threshold_bytes: state.settings.soft_threshold_bytes,
            stage_timeouts_ms: state.settings.stage_timeouts,
        },
    };
    info!(request_id = %ctx.request_id, intent = %ctx.intent, "query admitted");

    // RESOLVE..ENVELOPE run before the stream so the fingerprint headers
    // are final; failures here surface as plain HTTP errors.
    let prepared = state.pipeline.prepare(ctx).await?;
    let fingerprints = prepared.sealed.fingerprints.clone();

    let rx = state.pipeline.clone().stream(prepared);
    let stream = ReceiverStream::new(rx).map(Ok::<String, Infallible>);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(X_REQUEST_ID, request_id)
        .header(X_SNAPSHOT_ETAG, snapshot_etag)
        .header(X_BV_POLICY_FINGERPRINT, &fingerprints.policy_fp)
        .header(X_BV_ALLOWED_IDS_FP, &fingerprints.allowed_ids_fp)
        .header(X_BV_GRAPH_FP, &fingerprints.graph_fp)
        .header(X_BV_BUNDLE_FP, &fingerprints.bundle_fp)
        .header(X_BV_SCHEMA_FP, &fingerprints.schema_fp)
        .body(Body::from_stream(stream))
        .map_err(|e| GatewayError::Internal(e.into()))?;
    Ok(response)
}

/// GET /v3/bundles/{request_id} — recompute fingerprints from the persisted
/// artifacts and report whether they match what the response recorded.
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse> {
    let final_bytes = state
        .store
        .get(&request_id, artifacts::FINAL)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::NotFound(request_id.clone()))?;
    let final_envelope: ResponseEnvelope = serde_json::from_slice(&final_bytes)
        .map_err(|e| GatewayError::Internal(e.into()))?;
    let recorded = final_envelope.response.meta.fingerprints.clone();

    let envelope_bytes = state
        .store
        .get(&request_id, artifacts::ENVELOPE)
        .await
        .map_err(GatewayError::Internal)?;
    let evidence_post_bytes = state
        .store
        .get(&request_id, artifacts::EVIDENCE_POST)
        .await
        .map_err(GatewayError::Internal)?;

    // Recompute from the artifacts themselves; the persisted bytes are
    // canonical, so hashing them directly replays the fingerprints.
    let recomputed_prompt_fp = envelope_bytes
        .as_deref()
        .map(bv_canon::fingerprint_bytes);
    let recomputed_bundle_fp = evidence_post_bytes
        .as_deref()
        .map(bv_canon::fingerprint_bytes);
    let recomputed_allowed_ids_fp = {
        let ids = &final_envelope.response.evidence.allowed_ids;
        let value = serde_json::to_value(ids).unwrap_or_default();
        Some(bv_canon::fingerprint_value(&value))
    };

    let verified = recomputed_prompt_fp.as_deref() == Some(recorded.prompt_fp.as_str())
        && recomputed_bundle_fp.as_deref() == Some(recorded.bundle_fp.as_str())
        && recomputed_allowed_ids_fp.as_deref() == Some(recorded.allowed_ids_fp.as_str());

    Ok(Json(json!({
        "request_id": request_id,
        "verified": verified,
        "recorded": recorded,
        "recomputed": {
            "prompt_fp": recomputed_prompt_fp,
            "bundle_fp": recomputed_bundle_fp,
            "allowed_ids_fp": recomputed_allowed_ids_fp,
        },
        "evidence": final_envelope.response.evidence,
        "completeness_flags": final_envelope.response.completeness_flags,
    })))
}

/// Probe the Memory API for the current snapshot etag, with a short-lived
/// cache so bursts do not hammer the probe endpoint.
pub async fn current_snapshot(state: &AppState) -> Result<String> {
    let key = SnapshotCache::key("snapshot", "current", &json!("etag"));
    if let Some(hit) = state.cache.get::<String>(&key).await {
        return Ok(hit);
    }
    let etag = state.memory.snapshot_etag().await?;
    state.cache.put(key, &etag, SNAPSHOT_PROBE_TTL).await;
    Ok(etag)
}
