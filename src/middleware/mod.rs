//! HTTP middleware for the edge layer.
//!
//! - **Rate Limiting**: Per-client token buckets with optional repeat-offender penalty
//! - **Client Identity**: Forwarded-header aware client resolution with trusted proxy CIDRs
//! - **Response Cache**: Buffers, minifies and memoizes HTML/JSON GET responses
//! - **Cache Headers**: `Cache-Control` for static assets vs dynamic pages
//! - **Admin Auth**: `X-API-Key` check in front of the `/admin` routes
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Cache Headers → Response Cache → Handler
//!              ↓                 ↓               ↓
//!          429 Too Many    Cache-Control    X-Cache: HIT | MISS
//! ```
//!
//! Request IDs, tracing and CORS come from `tower-http` and are wired in
//! [`crate::routes`].

pub mod auth;
pub mod cache_headers;
pub mod ip;
pub mod rate_limit;
pub mod response_cache;

pub use auth::{API_KEY_HEADER, AdminAuthLayer};
pub use cache_headers::{CacheHeadersLayer, is_static_asset};
pub use ip::{
    CidrRange, IdentitySource, TrustedProxyConfig, UNKNOWN_IP, extract_client_ip,
    resolve_client_identity,
};
pub use rate_limit::{Decision, RATE_LIMIT_LIMIT_HEADER, RateLimitLayer};
pub use response_cache::{
    CacheStatus, CachedResponse, ResponseCache, ResponseCacheLayer, ResponseCacheSettings,
    X_CACHE, cache_key,
};
