//! # wotdir HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `/` - Redirects to `/things`
//! - `GET|HEAD /things[/]` - List documents (paged, `format=array|collection`)
//! - `POST /things[/]` - Register an anonymous document
//! - `GET|HEAD /things/{id}` - Retrieve one document
//! - `PUT /things/{id}` - Create or replace
//! - `PATCH /things/{id}` - JSON merge patch
//! - `DELETE /things/{id}` - Remove
//! - `GET /events`, `GET /events/{category}` - Server-Sent Events
//! - `GET /health` - Health check
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `WOTDIR_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `WOTDIR_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)

mod events;
mod handlers;
mod middleware;
mod types;

pub use events::{frame, pump};
pub use handlers::{LD_JSON, MERGE_PATCH_JSON, TD_JSON};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    ApiError, ErrorDetails, HealthResponse, ListFormat, ListParams, PROBLEM_JSON,
    ValidationErrorJson, directory_status,
};

use crate::config::AppConfig;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{any, get},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wotdir_core::{Directory, DirectoryError};

const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the directory plus the HTTP-facing settings.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<Directory>,
    /// No trailing slash; empty for relative URLs.
    pub base_url: Arc<str>,
    pub page_size: usize,
    pub replay_delay: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(directory: Directory, config: &AppConfig) -> Self {
        let replay_delay = Duration::from_millis(directory.config().replay_delay_ms);
        Self {
            directory: Arc::new(directory),
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            page_size: config.page_size.max(1),
            replay_delay,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from environment configuration.
///
/// Reads `WOTDIR_CORS_ORIGINS`:
/// - "*": allows all origins
/// - not set: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("WOTDIR_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (WOTDIR_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in WOTDIR_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restricted_cors(allowed_origins)
            }
        }
        None => {
            tracing::info!("CORS: No WOTDIR_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8081",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8081",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([header::LOCATION, header::LINK])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit (2 MiB)
/// 4. Rate Limiting - if enabled
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/", any(handlers::root_redirect_handler))
        .route("/health", get(handlers::health_handler))
        .route(
            "/things",
            get(handlers::list_things_handler).post(handlers::register_thing_handler),
        )
        .route(
            "/things/",
            get(handlers::list_things_handler).post(handlers::register_thing_handler),
        )
        .route(
            "/things/{id}",
            get(handlers::get_thing_handler)
                .put(handlers::put_thing_handler)
                .patch(handlers::patch_thing_handler)
                .delete(handlers::delete_thing_handler),
        )
        .route("/events", get(events::all_events_handler))
        .route("/events/{category}", get(events::category_events_handler));

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Rebuild the cache from the store, then serve until the process stops.
pub async fn run_server(directory: Directory, config: &AppConfig) -> Result<(), DirectoryError> {
    let report = directory.rebuild_cache()?;
    tracing::info!(
        event = "cache_rebuilt",
        loaded = report.loaded,
        skipped = report.skipped.len(),
        "Loaded things from store"
    );
    for (key, reason) in &report.skipped {
        tracing::warn!(event = "partition_skipped", key = %key, reason = %reason);
    }

    let addr = config.bind_addr();
    let state = AppState::new(directory, config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DirectoryError::Internal(format!("Bind failed: {}", e)))?;

    tracing::info!("wotdir HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| DirectoryError::Internal(format!("Server error: {}", e)))
}
