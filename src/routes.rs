//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (applied in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and echoes x-request-id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Cache Headers   │ ← Cache-Control for static vs dynamic paths
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Response Cache  │ ← X-Cache: HIT | MISS (content routes only)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/`, `/api/info`, `/robots.txt` - Content, behind the response cache
//! - `/health`, `/stats` - Monitoring, never cached
//! - `/admin/cache` - Operator actions, behind `X-API-Key`. Only mounted when
//!   `ADMIN_API_KEY` is set; otherwise the path falls through to the 404.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    AdminAuthLayer, CacheHeadersLayer, RateLimitLayer, ResponseCacheLayer, ResponseCacheSettings,
    TrustedProxyConfig,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// Middleware is configured based on the application config:
///
/// - **Rate Limiting**: Enabled if `rate_limit_capacity > 0`
/// - **Penalty**: Enabled if `rate_limit_penalty > 0`
/// - **Response Cache**: Bypassed in development mode
/// - **Admin Routes**: Mounted only if `admin_api_key` is set
/// - **CORS**: Configured from `cors_allowed_origins`
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // =========================================================================
    // Content Routes (cached)
    // =========================================================================
    let settings = ResponseCacheSettings::from(&*config);
    info!(
        ttl_secs = settings.ttl.as_secs(),
        buffer_limit = settings.buffer_limit,
        bypass = settings.bypass_cache,
        single_flight = settings.single_flight,
        "Response cache configured"
    );
    let content = Router::new()
        .route("/", get(handlers::index))
        .route("/api/info", get(handlers::api_info))
        .route("/robots.txt", get(handlers::robots_txt))
        .layer(ResponseCacheLayer::new(
            Arc::clone(&state.response_cache),
            settings,
        ));

    // =========================================================================
    // Operational Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .merge(content);

    // =========================================================================
    // Admin Routes (authenticated)
    // =========================================================================
    match &config.admin_api_key {
        Some(key) => {
            info!("Admin routes enabled (X-API-Key required)");
            let admin = Router::new()
                .route("/admin/cache", delete(handlers::clear_cache))
                .route_layer(AdminAuthLayer::new(key.as_str()));
            router = router.merge(admin);
        }
        None => info!("Admin routes disabled (ADMIN_API_KEY not set)"),
    }

    router = router.fallback(handlers::not_found);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 3. Browser cache directives
    router = router.layer(CacheHeadersLayer::new());

    // 4. Rate limiting (if enabled)
    if let Some(limiter) = &state.limiter {
        info!(
            capacity = config.rate_limit_capacity,
            refill_ms = config.rate_limit_refill_interval.as_millis() as u64,
            penalty_ms = config.rate_limit_penalty.as_millis() as u64,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(
            RateLimitLayer::new(
                Arc::clone(limiter),
                TrustedProxyConfig::new(&config.trusted_proxies),
            )
            .with_penalty(Arc::clone(&state.offenders), config.rate_limit_penalty),
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_CAPACITY=0)");
    }

    // 5. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 6. Request ID: generated outermost so every layer above sees it
    router = router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin; anything else is treated as an explicit list.
/// Origins that are not valid header values are skipped.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
