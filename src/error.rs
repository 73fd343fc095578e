//! Gateway error taxonomy and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::pipeline::Stage;

/// Everything that can fail a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("anchor not found: {0}")]
    NotFound(String),

    #[error("stage {stage} exceeded its budget")]
    StageTimeout { stage: Stage },

    #[error("snapshot precondition failed: client on {client}, server on {server}")]
    PreconditionFailed { client: String, server: String },

    #[error("policy key mismatch")]
    PolicyMismatch { policy_fp: String },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("model output parse failure: {0}")]
    Parse(String),

    #[error("model output schema failure: {0}")]
    Schema(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Stable machine-readable code, used on NDJSON error lines and in HTTP
    /// error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::StageTimeout { .. } => "stage_timeout",
            GatewayError::PreconditionFailed { .. } => "precondition_failed",
            GatewayError::PolicyMismatch { .. } => "policy_mismatch",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Parse(_) => "parse_error",
            GatewayError::Schema(_) => "schema_error",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::StageTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            GatewayError::PolicyMismatch { .. } => StatusCode::CONFLICT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Parse(_) | GatewayError::Schema(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<bv_memory_client::MemoryError> for GatewayError {
    fn from(err: bv_memory_client::MemoryError) -> Self {
        match err {
            bv_memory_client::MemoryError::NotFound(what) => GatewayError::NotFound(what),
            other => GatewayError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        // PolicyMismatch carries the server-computed fingerprint so the
        // client can retry once with the right key.
        if let GatewayError::PolicyMismatch { ref policy_fp } = self {
            body["error"]["policy_fp"] = json!(policy_fp);
        }
        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
