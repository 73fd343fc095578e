//! Request/response header names of the gateway contract.

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_SNAPSHOT_ETAG: &str = "x-snapshot-etag";
pub const X_POLICY_KEY: &str = "x-policy-key";
pub const TRACEPARENT: &str = "traceparent";

pub const X_BV_POLICY_FINGERPRINT: &str = "x-bv-policy-fingerprint";
pub const X_BV_ALLOWED_IDS_FP: &str = "x-bv-allowed-ids-fp";
pub const X_BV_GRAPH_FP: &str = "x-bv-graph-fp";
pub const X_BV_BUNDLE_FP: &str = "x-bv-bundle-fp";
pub const X_BV_SCHEMA_FP: &str = "x-bv-schema-fp";

/// Read a header as a string, dropping non-UTF-8 values.
pub fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
