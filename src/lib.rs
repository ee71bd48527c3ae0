//! # Edge Layer
//!
//! HTTP edge middleware for Axum services, featuring:
//!
//! - **Rate Limiting**: Per-client token buckets with an optional
//!   repeat-offender penalty
//! - **Client Identity**: `X-Forwarded-For` / `X-Real-IP` resolution gated
//!   by trusted proxy CIDRs
//! - **Response Caching**: GET responses minified once and replayed from
//!   memory with `X-Cache: HIT | MISS`
//! - **Observability**: Request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Rate Limit → Cache)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (pages, health, admin)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Stores (ExpiringCache, TokenBucketLimiter) + sweeper       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_layer::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Tighten the rate limit and put abusers in the penalty box for a minute:
//! ```bash
//! RATE_LIMIT_CAPACITY=100 RATE_LIMIT_PENALTY_MS=60000 cargo run
//! ```
//!
//! Render every request fresh while developing:
//! ```bash
//! APP_ENV=development cargo run
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
mod lock;
pub mod metrics;
pub mod middleware;
pub mod minify;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use cache::ExpiringCache;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use limiter::{RateLimitError, TokenBucketLimiter};
pub use minify::{ContentKind, MinifyError, minify};
pub use routes::build_router;
pub use state::AppState;
