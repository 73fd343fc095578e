//! HTTP surface assembly.

pub mod config_routes;
pub mod headers;
pub mod query_routes;
pub mod rate_limit;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use rate_limit::RateLimiter;

/// Build the gateway router with CORS, tracing, and rate limiting.
pub fn create_router(state: AppState) -> Router {
    let limiter = Arc::new(RateLimiter::new(state.settings.rate_limit.per_second));

    Router::new()
        .route("/v3/query", post(query_routes::post_query))
        .route("/v3/bundles/:request_id", get(query_routes::get_bundle))
        .route("/config", get(config_routes::get_config))
        .route("/v2/schema/fields", get(config_routes::get_schema_fields))
        .route("/v2/schema/rels", get(config_routes::get_schema_rels))
        .route("/healthz", get(config_routes::healthz))
        .route("/readyz", get(config_routes::readyz))
        .layer(axum::middleware::from_fn(rate_limit::rate_limit))
        .layer(Extension(limiter))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
