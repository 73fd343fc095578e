//! HTTP surface tests: admission gates, streaming contract, verify view,
//! and the public configuration endpoints.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use batvault_gateway::api::create_router;
use common::{app, ANCHOR_ID, SNAPSHOT};

fn query_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v3/query")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/x-ndjson")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_lines(response: axum::response::Response) -> Vec<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ============================================================================
// Snapshot precondition
// ============================================================================

#[tokio::test]
async fn test_snapshot_mismatch_is_412_with_no_artifacts() {
    let (state, dir) = app("off", vec![]);
    let router = create_router(state);

    let mut request = query_request(serde_json::json!({ "anchor": ANCHOR_ID }));
    request
        .headers_mut()
        .insert("x-snapshot-etag", "E0".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "precondition_failed");

    // No stream, no artifacts.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ============================================================================
// Policy mismatch carries the server fingerprint for a one-shot retry
// ============================================================================

#[tokio::test]
async fn test_policy_mismatch_then_retry_succeeds() {
    let (state, _dir) = app("off", vec![]);
    let policy_fp = state.policy_fp.clone();
    let router = create_router(state);

    let mut probe = query_request(serde_json::json!({ "anchor": ANCHOR_ID }));
    probe
        .headers_mut()
        .insert("x-policy-key", "probe".parse().unwrap());
    let rejected = router.clone().oneshot(probe).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::CONFLICT);
    let body = body_json(rejected).await;
    assert_eq!(body["error"]["code"], "policy_mismatch");
    let served_fp = body["error"]["policy_fp"].as_str().unwrap().to_string();
    assert_eq!(served_fp, policy_fp);

    // Second attempt with the served fingerprint goes through.
    let mut retry = query_request(serde_json::json!({ "anchor": ANCHOR_ID }));
    retry
        .headers_mut()
        .insert("x-policy-key", served_fp.parse().unwrap());
    let accepted = router.oneshot(retry).await.unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
}

// ============================================================================
// Bad requests
// ============================================================================

#[tokio::test]
async fn test_empty_body_is_400() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);
    let response = router
        .oneshot(query_request(serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_anchor_is_400() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);
    let response = router
        .oneshot(query_request(
            serde_json::json!({ "anchor": "Not A Valid#Anchor" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Streaming contract and response headers
// ============================================================================

#[tokio::test]
async fn test_query_streams_ndjson_with_fingerprint_headers() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);

    let mut request = query_request(serde_json::json!({ "anchor": ANCHOR_ID }));
    request
        .headers_mut()
        .insert("x-request-id", "req-http-1".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(headers["x-request-id"], "req-http-1");
    assert_eq!(headers["x-snapshot-etag"], SNAPSHOT);
    for name in [
        "x-bv-policy-fingerprint",
        "x-bv-allowed-ids-fp",
        "x-bv-graph-fp",
        "x-bv-bundle-fp",
        "x-bv-schema-fp",
    ] {
        let value = headers[name].to_str().unwrap();
        assert!(
            value.starts_with("sha256:"),
            "{name} carries a sha256 fingerprint"
        );
    }

    let lines = body_lines(response).await;
    assert_eq!(lines.last().unwrap()["evt"], "final");
    assert_eq!(
        lines.iter().filter(|l| l["evt"] == "final").count(),
        1,
        "exactly one final line"
    );
}

// ============================================================================
// Bundle verify view
// ============================================================================

#[tokio::test]
async fn test_bundle_verify_view_replays_fingerprints() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);

    let mut request = query_request(serde_json::json!({ "anchor": ANCHOR_ID }));
    request
        .headers_mut()
        .insert("x-request-id", "req-verify".parse().unwrap());
    let response = router.clone().oneshot(request).await.unwrap();
    // Drain the stream so persistence has completed.
    let _ = body_lines(response).await;

    let verify = router
        .oneshot(
            Request::builder()
                .uri("/v3/bundles/req-verify")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(verify.status(), StatusCode::OK);
    let body = body_json(verify).await;
    assert_eq!(body["verified"], true);
    assert_eq!(body["request_id"], "req-verify");
}

#[tokio::test]
async fn test_unknown_bundle_is_404() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/v3/bundles/never-ran")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Config, schema explorer, health
// ============================================================================

#[tokio::test]
async fn test_config_surface() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);
    let response = router
        .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["endpoints"]["query"], "/v3/query");
    assert_eq!(body["signing"]["alg"], "Ed25519");
    assert!(body["timeouts_ms"]["search"].is_u64());
}

#[tokio::test]
async fn test_schema_rels_proxied() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/v2/schema/rels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["relations"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("CAUSAL")));
}

#[tokio::test]
async fn test_health_endpoints() {
    let (state, _dir) = app("off", vec![]);
    let router = create_router(state);

    let live = router
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = router
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    let body = body_json(ready).await;
    assert_eq!(body["snapshot_etag"], SNAPSHOT);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_over_window() {
    let strict = batvault_gateway::config::Settings::from_lookup(|key| match key {
        "LLM_MODE" => Some("off".to_string()),
        "API_RATE_LIMIT_DEFAULT" => Some("1/second".to_string()),
        _ => None,
    });
    let (state, _dir) = common::app_with(strict, vec![]);
    let router = create_router(state);

    let first = router
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
