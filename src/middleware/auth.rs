//! API key authentication for operator routes.
//!
//! Only the `/admin` routes sit behind this layer. The key travels in the
//! `X-API-Key` header and is compared in constant time:
//!
//! ```bash
//! ADMIN_API_KEY=your-secret-key cargo run
//! curl -X DELETE -H "X-API-Key: your-secret-key" http://localhost:3000/admin/cache
//! ```
//!
//! When `ADMIN_API_KEY` is unset the admin routes are not mounted at all
//! (see [`crate::routes`]), so there is no "auth disabled" mode here.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::ErrorResponse;

/// Header name for the admin API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Tower layer that rejects requests without the expected API key.
#[derive(Clone)]
pub struct AdminAuthLayer {
    expected_key: Arc<str>,
}

impl AdminAuthLayer {
    pub fn new(api_key: impl Into<Arc<str>>) -> Self {
        Self {
            expected_key: api_key.into(),
        }
    }
}

impl<S> Layer<S> for AdminAuthLayer {
    type Service = AdminAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminAuthService {
            inner,
            expected_key: Arc::clone(&self.expected_key),
        }
    }
}

/// Admin authentication service wrapper.
#[derive(Clone)]
pub struct AdminAuthService<S> {
    inner: S,
    expected_key: Arc<str>,
}

impl<S> Service<Request<Body>> for AdminAuthService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let expected_key = Arc::clone(&self.expected_key);

        Box::pin(async move {
            let valid = extract_api_key(&req).map(|key| constant_time_eq(key, &expected_key));

            match valid {
                Some(true) => {
                    debug!(path = %req.uri().path(), "Admin API key accepted");
                    inner.call(req).await
                }
                Some(false) => {
                    warn!(path = %req.uri().path(), "Invalid admin API key provided");
                    Ok(unauthorized_response("Invalid API key"))
                }
                None => {
                    warn!(path = %req.uri().path(), "Missing admin API key");
                    Ok(unauthorized_response("API key required"))
                }
            }
        })
    }
}

/// The `X-API-Key` header value, if present and visible ASCII.
fn extract_api_key<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Compare two keys without leaking the position of the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "API-Key")],
        Json(ErrorResponse {
            error: "unauthorized".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}
