//! # Middleware Module
//!
//! Global request rate limiting.
//!
//! - `WOTDIR_RATE_LIMIT`: Requests per second (default: 100, 0 disables)
//!
//! Long-lived SSE connections count once, when they open.

use super::types::{ErrorDetails, PROBLEM_JSON};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// RATE LIMITER
// =============================================================================

pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a global limiter; 0 falls back to the default rate.
pub fn create_rate_limiter(requests_per_second: u32) -> GlobalRateLimiter {
    let rps = NonZeroU32::new(requests_per_second)
        .or(NonZeroU32::new(DEFAULT_RATE_LIMIT))
        .unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}

/// `WOTDIR_RATE_LIMIT`, or 100 when unset or unparseable.
pub fn get_rate_limit_from_env() -> u32 {
    std::env::var("WOTDIR_RATE_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT)
}

/// Reject with 429 once the global quota is spent.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if limiter.check().is_ok() {
        return next.run(request).await;
    }
    tracing::warn!(event = "rate_limited", path = %request.uri().path(), "Rate limit exceeded");
    let details = ErrorDetails::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::CONTENT_TYPE, PROBLEM_JSON)],
        Json(details),
    )
        .into_response()
}

// =============================================================================
// TESTS
// =============================================================================
