//! Operator endpoints.

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::models::ClearCacheResponse;
use crate::state::AppState;

/// `DELETE /admin/cache` - drop every cached response.
///
/// Buckets and penalties are left alone; only rendered pages are discarded.
#[instrument(skip(state))]
pub async fn clear_cache(State(state): State<AppState>) -> Json<ClearCacheResponse> {
    Json(ClearCacheResponse {
        cleared: state.clear_response_cache(),
    })
}
