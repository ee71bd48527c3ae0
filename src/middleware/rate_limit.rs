//! Per-client rate limiting middleware.
//!
//! Wraps a shared [`TokenBucketLimiter`]: every request is attributed to a
//! client identity (see [`super::ip`]) and admitted only if that client's
//! bucket has a token left.
//!
//! # Configuration
//!
//! - `RATE_LIMIT_CAPACITY`: Bucket size per client (burst)
//! - `RATE_LIMIT_REFILL_INTERVAL_MS`: One token earned back per interval
//! - `RATE_LIMIT_PENALTY_MS`: Repeat-offender lockout (0 = off)
//! - `TRUSTED_PROXIES`: CIDR ranges of trusted reverse proxies
//!
//! # Response
//!
//! On rejection (429):
//! - `X-RateLimit-Limit`: Configured bucket capacity
//! - Body: `{"error":"rate_limited","message":"Rate limit exceeded"}`
//!
//! No `Retry-After` is sent; the limiter does not predict refill times.
//!
//! # Repeat Offenders
//!
//! With a penalty configured, a client that gets rejected is remembered in an
//! [`ExpiringCache`] for the penalty duration and rejected without consulting
//! its bucket until the entry expires. Penalized requests do not touch the
//! bucket, so tokens keep accruing during the lockout.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, extract_client_ip};
use crate::cache::ExpiringCache;
use crate::error::ErrorResponse;
use crate::limiter::TokenBucketLimiter;
use crate::metrics;

/// Header advertising the bucket capacity on 429 responses.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Outcome of the admission check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// The bucket was empty.
    Rejected,
    /// The client is serving a repeat-offender penalty.
    Penalized,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Rejected => "rejected",
            Decision::Penalized => "penalized",
        }
    }
}

/// Repeat-offender lockout state.
#[derive(Debug, Clone)]
struct Penalty {
    offenders: Arc<ExpiringCache<()>>,
    duration: Duration,
}

/// Rate limiting layer for Tower middleware stack.
///
/// The limiter is shared, not owned: the application keeps its own handle for
/// statistics and the periodic sweep.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(TokenBucketLimiter::new(1000, Duration::from_millis(60))?);
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<TokenBucketLimiter>,
    penalty: Option<Penalty>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<TokenBucketLimiter>, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            limiter,
            penalty: None,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// Reject clients outright for `duration` after their first rejection.
    ///
    /// A zero `duration` leaves the penalty disabled.
    pub fn with_penalty(mut self, offenders: Arc<ExpiringCache<()>>, duration: Duration) -> Self {
        self.penalty = (!duration.is_zero()).then_some(Penalty {
            offenders,
            duration,
        });
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            penalty: self.penalty.clone(),
            trusted_proxies: Arc::clone(&self.trusted_proxies),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<TokenBucketLimiter>,
    penalty: Option<Penalty>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> RateLimitService<S> {
    fn decide(&self, client_ip: &str) -> Decision {
        if let Some(penalty) = &self.penalty
            && penalty.offenders.get(client_ip).is_some()
        {
            return Decision::Penalized;
        }

        if self.limiter.allow(client_ip) {
            return Decision::Allowed;
        }

        if let Some(penalty) = &self.penalty {
            penalty.offenders.set(client_ip, (), penalty.duration);
            debug!(
                client_ip = %client_ip,
                penalty_ms = penalty.duration.as_millis() as u64,
                "Client marked as repeat offender"
            );
        }

        Decision::Rejected
    }
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
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
        let client_ip = extract_client_ip(&req, &self.trusted_proxies);
        let decision = self.decide(&client_ip);
        metrics::record_rate_limit_decision(decision.as_str());

        if decision == Decision::Allowed {
            // The clone is not ready; swap it in and drive the one that is
            let clone = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, clone);
            return Box::pin(async move { inner.call(req).await });
        }

        warn!(
            client_ip = %client_ip,
            path = %req.uri().path(),
            decision = decision.as_str(),
            "Rate limit exceeded"
        );

        let response = too_many_requests(self.limiter.capacity());
        Box::pin(async move { Ok(response) })
    }
}

fn too_many_requests(limit: u32) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RATE_LIMIT_LIMIT_HEADER, limit.to_string())],
        Json(ErrorResponse {
            error: "rate_limited".to_string(),
            message: "Rate limit exceeded".to_string(),
        }),
    )
        .into_response()
}
