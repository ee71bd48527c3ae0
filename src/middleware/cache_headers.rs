//! Browser cache directives for GET responses.
//!
//! Static assets (recognized by file extension) may be cached by browsers and
//! shared caches for a week; everything else must be revalidated on every use.
//!
//! | Path                      | Headers set                                                  |
//! |---------------------------|--------------------------------------------------------------|
//! | `*.css`, `*.js`, images, fonts | `Cache-Control: public, max-age=604800`, `Expires: <now + 1 week>` |
//! | anything else             | `Cache-Control: no-cache, must-revalidate`, `Pragma: no-cache` |
//!
//! Headers the handler already set are left alone. Non-GET requests are not
//! touched.

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use chrono::Utc;
use tower::{Layer, Service};

/// One week, the lifetime granted to static assets.
pub const STATIC_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".jpg", ".jpeg", ".png", ".gif", ".ico", ".svg", ".woff", ".woff2", ".ttf",
    ".eot",
];

/// Whether `path` names a static asset by its extension.
pub fn is_static_asset(path: &str) -> bool {
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Format `now + max_age` as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn http_date_after(max_age: Duration) -> Option<HeaderValue> {
    let delta = chrono::Duration::from_std(max_age).ok()?;
    let expires = Utc::now().checked_add_signed(delta)?;
    HeaderValue::from_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

fn set_default(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    headers.entry(name).or_insert(value);
}

fn apply_cache_headers(headers: &mut HeaderMap, path: &str) {
    if is_static_asset(path) {
        let cache_control = format!("public, max-age={}", STATIC_MAX_AGE.as_secs());
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            set_default(headers, CACHE_CONTROL, value);
        }
        if let Some(expires) = http_date_after(STATIC_MAX_AGE) {
            set_default(headers, EXPIRES, expires);
        }
    } else {
        set_default(
            headers,
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, must-revalidate"),
        );
        set_default(headers, PRAGMA, HeaderValue::from_static("no-cache"));
    }
}

/// Tower layer adding `Cache-Control` directives to GET responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheHeadersLayer;

impl CacheHeadersLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CacheHeadersLayer {
    type Service = CacheHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheHeadersService { inner }
    }
}

/// Cache headers service wrapper.
#[derive(Debug, Clone)]
pub struct CacheHeadersService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for CacheHeadersService<S>
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

        let path = (*req.method() == Method::GET).then(|| req.uri().path().to_string());

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            if let Some(path) = path {
                apply_cache_headers(response.headers_mut(), &path);
            }
            Ok(response)
        })
    }
}
