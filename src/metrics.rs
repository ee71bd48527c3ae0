//! Prometheus metrics for the edge layer.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so library users and tests pay nothing for them.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `edge_response_cache_lookups_total` - Response cache outcomes (label: outcome = hit|miss|bypass)
//! - `edge_minify_failures_total` - Minifications that fell back to the original body (labels: content, reason)
//! - `edge_minify_bytes_saved_total` - Bytes removed by minification
//! - `edge_rate_limit_decisions_total` - Admission decisions (label: decision = allowed|rejected|penalized)
//! - `edge_sweep_evictions_total` - Entries removed by the periodic sweep (label: store)
//!
//! ## Histograms
//! - `edge_render_duration_seconds` - Handler time on cache misses that could be stored
//!
//! ## Gauges
//! - `edge_response_cache_entries` - Stored responses
//! - `edge_limiter_buckets` - Tracked client buckets
//! - `edge_penalty_entries` - Clients currently serving a penalty

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RESPONSE_CACHE_LOOKUPS_TOTAL: &str = "edge_response_cache_lookups_total";
    pub const MINIFY_FAILURES_TOTAL: &str = "edge_minify_failures_total";
    pub const MINIFY_BYTES_SAVED_TOTAL: &str = "edge_minify_bytes_saved_total";
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "edge_rate_limit_decisions_total";
    pub const SWEEP_EVICTIONS_TOTAL: &str = "edge_sweep_evictions_total";
    pub const RENDER_DURATION_SECONDS: &str = "edge_render_duration_seconds";
    pub const RESPONSE_CACHE_ENTRIES: &str = "edge_response_cache_entries";
    pub const LIMITER_BUCKETS: &str = "edge_limiter_buckets";
    pub const PENALTY_ENTRIES: &str = "edge_penalty_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// This sets up metric descriptions and starts the Prometheus HTTP listener
/// on the specified address.
///
/// # Returns
///
/// `Ok(())` if initialization succeeds, `Err` with message otherwise.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RESPONSE_CACHE_LOOKUPS_TOTAL,
        "Response cache lookups by outcome"
    );
    describe_counter!(
        names::MINIFY_FAILURES_TOTAL,
        "Minifications that failed and served the original body"
    );
    describe_counter!(
        names::MINIFY_BYTES_SAVED_TOTAL,
        "Total bytes removed from response bodies by minification"
    );
    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limiter admission decisions"
    );
    describe_counter!(
        names::SWEEP_EVICTIONS_TOTAL,
        "Entries evicted by the periodic sweep"
    );

    describe_histogram!(
        names::RENDER_DURATION_SECONDS,
        "Downstream handler duration on cache misses in seconds"
    );

    describe_gauge!(
        names::RESPONSE_CACHE_ENTRIES,
        "Responses currently held by the response cache"
    );
    describe_gauge!(names::LIMITER_BUCKETS, "Client buckets tracked by the rate limiter");
    describe_gauge!(
        names::PENALTY_ENTRIES,
        "Clients currently rejected as repeat offenders"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a response cache lookup outcome (`hit`, `miss` or `bypass`).
///
/// `bypass` counts requests that could never be stored: development mode,
/// and responses that are not HTML/JSON or are content-encoded.
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(names::RESPONSE_CACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a minification that fell back to the original bytes.
pub fn record_minify_failure(content: &'static str, reason: &'static str) {
    counter!(names::MINIFY_FAILURES_TOTAL, "content" => content, "reason" => reason).increment(1);
}

/// Record the size reduction of a successful minification.
pub fn record_minify_savings(original_len: usize, minified_len: usize) {
    let saved = original_len.saturating_sub(minified_len);
    counter!(names::MINIFY_BYTES_SAVED_TOTAL).increment(saved as u64);
}

/// Record a rate limiter decision (`allowed`, `rejected` or `penalized`).
pub fn record_rate_limit_decision(decision: &'static str) {
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

/// Record entries removed by the sweeper from `store`.
pub fn record_sweep_evictions(store: &'static str, count: usize) {
    counter!(names::SWEEP_EVICTIONS_TOTAL, "store" => store).increment(count as u64);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record how long the downstream handler took on a storable cache miss.
pub fn record_render_duration(duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Publish current store sizes.
pub fn set_store_sizes(response_cache: usize, limiter_buckets: usize, penalties: usize) {
    gauge!(names::RESPONSE_CACHE_ENTRIES).set(response_cache as f64);
    gauge!(names::LIMITER_BUCKETS).set(limiter_buckets as f64);
    gauge!(names::PENALTY_ENTRIES).set(penalties as f64);
}
