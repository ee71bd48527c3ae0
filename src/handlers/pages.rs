//! Cacheable content routes.
//!
//! These handlers sit behind the response cache and are written the way a
//! template engine would emit them: indented markup, comments and
//! pretty-printed JSON. The cache layer minifies them on the way out.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Uri};
use axum::response::Html;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::models::{ApiInfo, EndpointInfo};
use crate::state::AppState;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Edge Layer</title>
    <!-- rendered per request, served from the response cache -->
    <style>
      body   { font-family: sans-serif;   margin: 2rem; }
      pre    { background: #f4f4f4; }
    </style>
  </head>
  <body>
    <h1>
      Edge Layer
    </h1>
    <p>
      Responses on this page are minified once and then served
      from memory until the cache entry expires.
    </p>
    <pre>
GET  /            this page
GET  /api/info    service description
GET  /health      liveness
    </pre>
    <!--[if IE]><p>Your browser is not supported.</p><![endif]-->
  </body>
</html>
"#;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /admin/\n";

/// `GET /` - demonstration page.
#[instrument(skip_all)]
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /api/info` - pretty-printed service description.
///
/// # Errors
///
/// Returns `AppError::Internal` if the document cannot be serialized.
#[instrument(skip(state))]
pub async fn api_info(
    State(state): State<AppState>,
) -> AppResult<([(HeaderName, &'static str); 1], String)> {
    let info = ApiInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        run_mode: state.config.run_mode.to_string(),
        cache_ttl_seconds: state.config.response_cache_ttl.as_secs(),
        rate_limit_capacity: state.config.rate_limit_capacity,
        endpoints: vec![
            EndpointInfo {
                method: "GET",
                path: "/",
                description: "Demonstration page",
            },
            EndpointInfo {
                method: "GET",
                path: "/api/info",
                description: "This document",
            },
            EndpointInfo {
                method: "GET",
                path: "/health",
                description: "Health check",
            },
            EndpointInfo {
                method: "GET",
                path: "/stats",
                description: "Cache and limiter statistics",
            },
            EndpointInfo {
                method: "DELETE",
                path: "/admin/cache",
                description: "Clear the response cache",
            },
        ],
    };

    let body = serde_json::to_string_pretty(&info)
        .map_err(|e| AppError::Internal(format!("failed to serialize api info: {e}")))?;

    Ok(([(CONTENT_TYPE, "application/json")], body))
}

/// `GET /robots.txt`
pub async fn robots_txt() -> &'static str {
    ROBOTS_TXT
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
