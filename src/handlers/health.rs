//! Health and statistics endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /stats` - Store sizes and uptime
//!
//! Neither route sits behind the response cache, so the numbers are always
//! current.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, StatsResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK while the process is serving requests.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip_all)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Statistics endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "response_cache_entries": 3,
///   "limiter_buckets": 12,
///   "penalized_clients": 0,
///   "rate_limiting_enabled": true,
///   "run_mode": "production",
///   "uptime_seconds": 3600
/// }
/// ```
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        response_cache_entries: state.response_cache.size(),
        limiter_buckets: state.limiter_buckets(),
        penalized_clients: state.offenders.size(),
        rate_limiting_enabled: state.limiter.is_some(),
        run_mode: state.config.run_mode.to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}
