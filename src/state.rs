//! Shared application state for Axum handlers and middleware.
//!
//! The stores are constructed once here and handed to the middleware that
//! uses them, so handlers can report on and clear the same instances:
//!
//! - **Response cache**: Minified GET responses
//! - **Rate limiter**: Per-client token buckets (absent when limiting is disabled)
//! - **Offenders**: Clients serving a repeat-offender penalty
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! The periodic sweeper is managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop it before application exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::cache::ExpiringCache;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::limiter::TokenBucketLimiter;
use crate::metrics;
use crate::middleware::ResponseCache;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_responses: usize,
    pub expired_penalties: usize,
    pub refilled_buckets: usize,
}

/// Shared application state.
///
/// Cheap to clone: every store is behind an `Arc`.
///
/// # Lifecycle
///
/// The sweeper is spawned when the state is created (if enabled). Call
/// `shutdown()` before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Minified GET responses
    pub response_cache: Arc<ResponseCache>,
    /// Per-client buckets; `None` when `RATE_LIMIT_CAPACITY=0`
    pub limiter: Option<Arc<TokenBucketLimiter>>,
    /// Clients currently rejected without consulting their bucket
    pub offenders: Arc<ExpiringCache<()>>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the shared stores and start the sweeper.
    ///
    /// Must be called from within a Tokio runtime when
    /// `config.sweep_interval` is non-zero.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limiter configuration is
    /// invalid.
    pub fn new(config: Config) -> AppResult<Self> {
        let limiter = if config.rate_limiting_enabled() {
            let limiter = TokenBucketLimiter::with_shards(
                config.rate_limit_capacity,
                config.rate_limit_refill_interval,
                config.limiter_shards,
            )
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
            Some(Arc::new(limiter))
        } else {
            None
        };

        let state = Self {
            config: Arc::new(config),
            response_cache: Arc::new(ResponseCache::new()),
            limiter,
            offenders: Arc::new(ExpiringCache::new()),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.sweeper_enabled() {
            state.spawn_sweeper(state.config.sweep_interval);
        }

        Ok(state)
    }

    /// Number of client buckets tracked by the limiter.
    pub fn limiter_buckets(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.bucket_count())
    }

    /// Drop every cached response, returning how many there were.
    pub fn clear_response_cache(&self) -> usize {
        let cleared = self.response_cache.size();
        self.response_cache.clear();
        info!(cleared, "Response cache cleared");
        cleared
    }

    /// Run one sweep immediately.
    pub fn sweep(&self) -> SweepReport {
        sweep_stores(
            &self.response_cache,
            &self.offenders,
            self.limiter.as_deref(),
        )
    }

    /// Spawn the periodic sweeper.
    ///
    /// The task clones only the stores it sweeps and respects
    /// `cancellation_token` for graceful shutdown.
    fn spawn_sweeper(&self, period: Duration) {
        let response_cache = Arc::clone(&self.response_cache);
        let offenders = Arc::clone(&self.offenders);
        let limiter = self.limiter.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_stores(&response_cache, &offenders, limiter.as_deref());
                    }
                }
            }

            debug!("Sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Purge expired and idle entries from every store and publish their sizes.
fn sweep_stores(
    response_cache: &ResponseCache,
    offenders: &ExpiringCache<()>,
    limiter: Option<&TokenBucketLimiter>,
) -> SweepReport {
    let report = SweepReport {
        expired_responses: response_cache.purge_expired(),
        expired_penalties: offenders.purge_expired(),
        refilled_buckets: limiter.map_or(0, TokenBucketLimiter::purge_refilled),
    };

    metrics::record_sweep_evictions("response_cache", report.expired_responses);
    metrics::record_sweep_evictions("penalties", report.expired_penalties);
    metrics::record_sweep_evictions("limiter", report.refilled_buckets);
    metrics::set_store_sizes(
        response_cache.size(),
        limiter.map_or(0, TokenBucketLimiter::bucket_count),
        offenders.size(),
    );

    if report == SweepReport::default() {
        trace!("Sweep found nothing to evict");
    } else {
        debug!(
            expired_responses = report.expired_responses,
            expired_penalties = report.expired_penalties,
            refilled_buckets = report.refilled_buckets,
            "Sweep evicted entries"
        );
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};
    use bytes::Bytes;

    use super::*;
    use crate::middleware::CachedResponse;

    fn cached() -> CachedResponse {
        CachedResponse {
            status: StatusCode::OK,
            content_type: HeaderValue::from_static("text/html"),
            body: Bytes::from_static(b"<p>x</p>"),
        }
    }

    #[tokio::test]
    async fn test_limiter_absent_when_disabled() {
        let state = AppState::new(Config {
            rate_limit_capacity: 0,
            ..Config::default()
        })
        .unwrap();

        assert!(state.limiter.is_none());
        assert_eq!(state.limiter_buckets(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_limiter_config_is_rejected() {
        let result = AppState::new(Config {
            rate_limit_refill_interval: Duration::ZERO,
            ..Config::default()
        });

        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_clear_response_cache() {
        let state = AppState::new(Config::default()).unwrap();
        state.response_cache.set("/", cached(), Duration::from_secs(60));
        state.response_cache.set("/a", cached(), Duration::from_secs(60));

        assert_eq!(state.clear_response_cache(), 2);
        assert!(state.response_cache.is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_entries() {
        let state = AppState::new(Config {
            rate_limit_capacity: 2,
            rate_limit_refill_interval: Duration::from_millis(10),
            ..Config::default()
        })
        .unwrap();

        state.response_cache.set("/old", cached(), Duration::from_millis(10));
        state.response_cache.set("/new", cached(), Duration::from_secs(60));
        state.offenders.set("1.1.1.1", (), Duration::from_millis(10));
        let limiter = state.limiter.clone().unwrap();
        assert!(limiter.allow("1.1.1.1"));

        tokio::time::sleep(Duration::from_millis(40)).await;

        let report = state.sweep();
        assert_eq!(report.expired_responses, 1);
        assert_eq!(report.expired_penalties, 1);
        assert_eq!(report.refilled_buckets, 1);
        assert_eq!(state.response_cache.size(), 1);
        assert_eq!(state.limiter_buckets(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_sweeper_runs_and_stops() {
        let state = AppState::new(Config {
            sweep_interval: Duration::from_millis(20),
            ..Config::default()
        })
        .unwrap();

        state.response_cache.set("/old", cached(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(state.response_cache.is_empty());
        state.shutdown().await;
    }
}
