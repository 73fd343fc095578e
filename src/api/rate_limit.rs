//! Fixed-window per-process rate limiting from `API_RATE_LIMIT_DEFAULT`.

use std::sync::Mutex;
use std::time::Instant;

use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct RateLimiter {
    per_second: u32,
    window: Mutex<Window>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Count one request against the current one-second window.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().expect("rate limiter lock");
        if window.started.elapsed().as_secs() >= 1 {
            window.started = Instant::now();
            window.count = 0;
        }
        if window.count >= self.per_second {
            return false;
        }
        window.count += 1;
        true
    }
}

/// Axum middleware rejecting requests over the window with 429.
pub async fn rate_limit(
    limiter: axum::Extension<std::sync::Arc<RateLimiter>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !limiter.try_acquire() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": { "code": "rate_limited", "message": "request rate exceeded" }
            })),
        )
            .into_response();
    }
    next.run(request).await
}
