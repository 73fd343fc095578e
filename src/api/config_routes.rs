//! Public configuration, schema explorer, and health endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::state::AppState;

/// GET /config — the public configuration surface.
pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = &state.settings;
    Json(json!({
        "gateway_base": settings.gateway_base,
        "memory_base": settings.memory_api_base,
        "endpoints": {
            "query": "/v3/query",
            "bundles": "/v3/bundles/{request_id}",
            "schema_fields": "/v2/schema/fields",
            "schema_rels": "/v2/schema/rels",
        },
        "timeouts_ms": {
            "search": settings.stage_timeouts.resolve,
            "expand": settings.stage_timeouts.expand,
            "enrich": settings.stage_timeouts.enrich,
            "validate": settings.stage_timeouts.validate,
        },
        "signing": {
            "alg": "Ed25519",
            "public_key_b64": settings.signing_public_key_b64,
        },
    }))
}

/// GET /v2/schema/fields — proxied from the Memory API.
pub async fn get_schema_fields(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let fields = state.memory.schema_fields().await?;
    Ok(Json(fields))
}

/// GET /v2/schema/rels — proxied from the Memory API.
pub async fn get_schema_rels(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let rels = state.memory.schema_rels().await?;
    let value = serde_json::to_value(rels).map_err(|e| GatewayError::Internal(e.into()))?;
    Ok(Json(value))
}

/// GET /healthz — process liveness.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /readyz — readiness, gated on Memory API reachability.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.memory.snapshot_etag().await {
        Ok(etag) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "snapshot_etag": etag })),
        ),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": error.to_string() })),
        ),
    }
}
