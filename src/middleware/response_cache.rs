//! Minifying response cache middleware.
//!
//! # Pipeline
//!
//! ```text
//!                 ┌──────────────┐ not GET
//!   request ────► │  PASSTHROUGH │ ─────────────────────────────► inner
//!                 └──────┬───────┘
//!                        │ GET, key = path[?query]
//!                        ▼
//!                 ┌──────────────┐ found
//!                 │    LOOKUP    │ ──────► HIT: stored bytes, X-Cache: HIT
//!                 └──────┬───────┘
//!                        │ absent
//!                        ▼
//!                 ┌──────────────┐ content type not HTML/JSON
//!                 │     MISS     │ ──────► handler response, untouched
//!                 └──────┬───────┘
//!                        │ buffer body, minify, store if 200 OK
//!                        ▼
//!                 minified bytes, X-Cache: MISS
//! ```
//!
//! # Failure Handling
//!
//! - A body that fails to minify is served (and cached) as the handler
//!   produced it. The failure is logged at debug level and counted.
//! - A body that cannot be buffered (stream error, or larger than the buffer
//!   limit) produces a 500 with the standard JSON error body.
//!
//! # Development Mode
//!
//! Lookup and storage are skipped, so every request runs the handler. Bodies
//! are still minified and marked `X-Cache: MISS`, but the lookup metric
//! counts them as `bypass`.
//!
//! # Concurrent Misses
//!
//! By default two concurrent misses for the same key both run the handler and
//! both store; the last write wins. With single-flight enabled, misses for
//! one key queue on a per-key async lock and re-check the cache once they hold
//! it, so only the first runs the handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::response::Parts;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use bytes::Bytes;
use tokio::sync::OwnedMutexGuard;
use tower::{Layer, Service};
use tracing::{debug, trace};

use crate::cache::ExpiringCache;
use crate::config::Config;
use crate::error::AppError;
use crate::lock::mutex_lock;
use crate::metrics;
use crate::minify::{ContentKind, minify};

/// Response header carrying the cache outcome.
pub const X_CACHE: &str = "x-cache";

/// The store backing [`ResponseCacheLayer`].
pub type ResponseCache = ExpiringCache<CachedResponse>;

/// A minified response as stored in the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub body: Bytes,
}

impl CachedResponse {
    fn into_response(self) -> Response<Body> {
        let content_length = HeaderValue::from(self.body.len());

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, self.content_type);
        headers.insert(CONTENT_LENGTH, content_length);
        headers.insert(X_CACHE, CacheStatus::Hit.header_value());

        response
    }
}

/// Value of the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }

    fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

/// Label recorded in the cache lookup counter.
///
/// `Miss` is reserved for requests whose response could have been stored.
/// Development mode and responses we cannot transform count as `Bypass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupOutcome {
    Hit,
    Miss,
    Bypass,
}

impl LookupOutcome {
    /// Outcome of a request that reached the handler.
    fn rendered(store: bool, transformable: bool) -> Self {
        if store && transformable {
            LookupOutcome::Miss
        } else {
            LookupOutcome::Bypass
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
            LookupOutcome::Bypass => "bypass",
        }
    }
}

/// A downstream response held in memory between the handler and the client.
struct BufferedResponse {
    parts: Parts,
    content_type: HeaderValue,
    body: Bytes,
}

impl BufferedResponse {
    fn to_cached(&self) -> CachedResponse {
        CachedResponse {
            status: self.parts.status,
            content_type: self.content_type.clone(),
            body: self.body.clone(),
        }
    }

    fn into_response(self) -> Response<Body> {
        let BufferedResponse {
            mut parts, body, ..
        } = self;

        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        parts
            .headers
            .insert(X_CACHE, CacheStatus::Miss.header_value());

        Response::from_parts(parts, Body::from(body))
    }
}

/// Response cache tuning.
#[derive(Debug, Clone)]
pub struct ResponseCacheSettings {
    /// Lifetime of stored responses (zero = never expire).
    pub ttl: Duration,
    /// Largest body that will be buffered, in bytes.
    pub buffer_limit: usize,
    /// Skip lookup and storage (development mode).
    pub bypass_cache: bool,
    /// Coalesce concurrent misses for one key.
    pub single_flight: bool,
}

impl Default for ResponseCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            buffer_limit: 10 * 1024 * 1024,
            bypass_cache: false,
            single_flight: false,
        }
    }
}

impl From<&Config> for ResponseCacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            ttl: config.response_cache_ttl,
            buffer_limit: config.response_buffer_limit,
            bypass_cache: config.run_mode.is_development(),
            single_flight: config.response_cache_single_flight,
        }
    }
}

/// Cache key for a request: the path, plus `?query` when there is one.
pub fn cache_key(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string()
}

// =============================================================================
// Single-Flight Locks
// =============================================================================

/// Per-key async locks for coalescing concurrent misses.
#[derive(Default)]
struct InFlight {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InFlight {
    async fn acquire(self: &Arc<Self>, key: &str) -> FlightGuard {
        let lock = {
            let mut locks = mutex_lock(&self.locks, "response_cache.inflight.acquire");
            Arc::clone(locks.entry(key.to_string()).or_default())
        };

        FlightGuard {
            inflight: Arc::clone(self),
            key: key.to_string(),
            _permit: lock.lock_owned().await,
        }
    }
}

/// Held while a miss renders; the key's lock entry is dropped with the last holder.
struct FlightGuard {
    inflight: Arc<InFlight>,
    key: String,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut locks = mutex_lock(&self.inflight.locks, "response_cache.inflight.release");
        // One reference in the map, one in our permit: nobody else is waiting
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.key);
        }
    }
}

// =============================================================================
// Layer & Service
// =============================================================================

struct Shared {
    cache: Arc<ResponseCache>,
    settings: ResponseCacheSettings,
    inflight: Option<Arc<InFlight>>,
}

/// Tower layer that caches and minifies GET responses.
///
/// # Example
///
/// ```rust,ignore
/// let cache = Arc::new(ResponseCache::new());
/// let app = Router::new()
///     .route("/", get(index))
///     .layer(ResponseCacheLayer::new(cache, ResponseCacheSettings::default()));
/// ```
#[derive(Clone)]
pub struct ResponseCacheLayer {
    shared: Arc<Shared>,
}

impl ResponseCacheLayer {
    pub fn new(cache: Arc<ResponseCache>, settings: ResponseCacheSettings) -> Self {
        let inflight = settings.single_flight.then(|| Arc::new(InFlight::default()));
        Self {
            shared: Arc::new(Shared {
                cache,
                settings,
                inflight,
            }),
        }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Response cache service wrapper.
#[derive(Clone)]
pub struct ResponseCacheService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Service<Request<Body>> for ResponseCacheService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if *req.method() != Method::GET {
            return Box::pin(async move { inner.call(req).await });
        }

        let shared = Arc::clone(&self.shared);
        Box::pin(async move { shared.serve(req, inner).await })
    }
}

impl Shared {
    async fn serve<S>(&self, req: Request<Body>, inner: S) -> Result<Response<Body>, S::Error>
    where
        S: Service<Request<Body>, Response = Response<Body>> + Send,
        S::Future: Send,
    {
        let key = cache_key(req.uri());

        if self.settings.bypass_cache {
            return self.render(&key, req, inner, false).await;
        }

        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let _flight = match &self.inflight {
            Some(inflight) => {
                let guard = inflight.acquire(&key).await;
                // Whoever held the lock before us may have stored it
                if let Some(hit) = self.lookup(&key) {
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        self.render(&key, req, inner, true).await
    }

    fn lookup(&self, key: &str) -> Option<Response<Body>> {
        let cached = self.cache.get(key)?;
        trace!(key, "Response cache hit");
        metrics::record_cache_lookup(LookupOutcome::Hit.as_str());
        Some(cached.into_response())
    }

    /// Run the handler, then minify and optionally store its response.
    async fn render<S>(
        &self,
        key: &str,
        req: Request<Body>,
        mut inner: S,
        store: bool,
    ) -> Result<Response<Body>, S::Error>
    where
        S: Service<Request<Body>, Response = Response<Body>> + Send,
        S::Future: Send,
    {
        let started = Instant::now();
        let response = inner.call(req).await?;
        let elapsed = started.elapsed();

        let target = transformable(&response);
        let outcome = LookupOutcome::rendered(store, target.is_some());
        metrics::record_cache_lookup(outcome.as_str());
        if outcome == LookupOutcome::Miss {
            metrics::record_render_duration(elapsed.as_secs_f64());
        }

        let Some((kind, content_type)) = target else {
            return Ok(response);
        };

        let (parts, body) = response.into_parts();
        let original = match axum::body::to_bytes(body, self.settings.buffer_limit).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(AppError::ResponseBuffer(e.to_string()).into_response()),
        };

        let body = match minify(kind, &original) {
            Ok(minified) => {
                metrics::record_minify_savings(original.len(), minified.len());
                minified
            }
            Err(e) => {
                debug!(
                    key,
                    content = kind.as_str(),
                    error = %e,
                    "Minification failed, serving original body"
                );
                metrics::record_minify_failure(kind.as_str(), e.kind());
                original
            }
        };

        let buffered = BufferedResponse {
            parts,
            content_type,
            body,
        };

        if store && buffered.parts.status == StatusCode::OK {
            self.cache.set(key, buffered.to_cached(), self.settings.ttl);
            trace!(key, bytes = buffered.body.len(), "Stored response");
        }

        Ok(buffered.into_response())
    }
}

/// The minifier kind and content type of a response we can transform.
///
/// Encoded bodies (gzip and friends) are never touched.
fn transformable(response: &Response<Body>) -> Option<(ContentKind, HeaderValue)> {
    let encoded = response
        .headers()
        .get(CONTENT_ENCODING)
        .is_some_and(|encoding| encoding != "identity");
    if encoded {
        return None;
    }

    let content_type = response.headers().get(CONTENT_TYPE)?;
    let kind = ContentKind::from_content_type(content_type.to_str().ok()?)?;
    Some((kind, content_type.clone()))
}
