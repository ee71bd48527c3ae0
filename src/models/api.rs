use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Statistics response.
///
/// Sizes are read directly from the shared stores and may include entries
/// that have expired but not yet been swept.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Entries in the response cache
    pub response_cache_entries: usize,
    /// Client buckets tracked by the rate limiter
    pub limiter_buckets: usize,
    /// Clients currently serving a repeat-offender penalty
    pub penalized_clients: usize,
    /// Whether requests are being rate limited at all
    pub rate_limiting_enabled: bool,
    /// `development` or `production`
    pub run_mode: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

/// Response after clearing the response cache.
#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    /// Number of entries removed
    pub cleared: usize,
}

/// One route listed by `/api/info`.
#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

/// Service description served at `/api/info`.
#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub run_mode: String,
    pub cache_ttl_seconds: u64,
    pub rate_limit_capacity: u32,
    pub endpoints: Vec<EndpointInfo>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_stats_response_field_order() {
        let response = StatsResponse {
            response_cache_entries: 3,
            limiter_buckets: 2,
            penalized_clients: 1,
            rate_limiting_enabled: true,
            run_mode: "production".to_string(),
            uptime_seconds: 42,
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert_eq!(
            json,
            r#"{"response_cache_entries":3,"limiter_buckets":2,"penalized_clients":1,"rate_limiting_enabled":true,"run_mode":"production","uptime_seconds":42}"#
        );
    }

    #[test]
    fn test_clear_cache_response_serialization() {
        let json = serde_json::to_string(&ClearCacheResponse { cleared: 7 }).unwrap();
        assert_eq!(json, r#"{"cleared":7}"#);
    }
}
