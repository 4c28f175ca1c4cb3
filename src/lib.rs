//! Portfolio roasting backend in front of the Gemini API.
//!
//! The service is built around three stateful components, each with its own
//! lock and its own cancellable background task:
//!
//! - [`rate_limit::RateLimiter`] - fixed-window request budget per client IP
//! - [`key_rotator::KeyRotator`] - round-robin over the configured API keys
//! - [`analytics::AnalyticsManager`] - usage counters with a single-writer
//!   JSON snapshot on disk
//!
//! [`state::AppState`] wires them together and [`router`] exposes them over HTTP.

pub mod analytics;
pub mod config;
pub mod error;
pub mod gemini;
pub mod handlers;
pub mod key_rotator;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod roast;
pub mod state;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;

use state::AppState;

/// Builds the HTTP routes. `/roast` is rate limited before it is tracked, so
/// rejected requests do not count as visits.
pub fn router(state: Arc<AppState>) -> Router {
    let track = from_fn_with_state(state.clone(), middleware::track_request);
    let limit = from_fn_with_state(state.clone(), middleware::rate_limit);

    Router::new()
        .route(
            "/roast",
            post(handlers::roast_handler)
                .layer(track.clone())
                .layer(limit),
        )
        .route("/health", get(handlers::health_handler).layer(track.clone()))
        .route("/analytics", get(handlers::analytics_handler).layer(track))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}
