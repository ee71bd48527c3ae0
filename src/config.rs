//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults that
//! match a production deployment. A `.env` file in the working directory is
//! loaded first if present.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_CAPACITY`: Bucket size per client (default: 1000, 0 disables)
//! - `RATE_LIMIT_REFILL_INTERVAL_MS`: One token per interval (default: 60)
//! - `RATE_LIMIT_PENALTY_MS`: Reject repeat offenders outright (default: 0, off)
//! - `TRUSTED_PROXIES`: Comma-separated CIDR ranges allowed to set forwarded headers
//!
//! The defaults admit a burst of 1000 requests and a sustained 1000 per minute.
//!
//! # Response Cache
//!
//! - `APP_ENV`: `development` bypasses cache lookup and storage
//! - `RESPONSE_CACHE_TTL_SECS`: Lifetime of stored responses (default: 3600)
//! - `RESPONSE_BUFFER_LIMIT`: Largest body that is buffered (default: 10MB)
//! - `RESPONSE_CACHE_SINGLE_FLIGHT`: Coalesce concurrent misses (default: false)
//!
//! # Security
//!
//! - `ADMIN_API_KEY`: Key required in `X-API-Key` for `/admin` routes. When
//!   unset or empty the admin routes are not served.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::limiter::DEFAULT_SHARDS;

/// Deployment mode, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    Development,
    #[default]
    Production,
}

impl RunMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RunMode::Development)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(format!(
                "expected \"development\" or \"production\", got {other:?}"
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Development => f.write_str("development"),
            RunMode::Production => f.write_str("production"),
        }
    }
}

/// Log output format, read from `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected \"text\" or \"json\", got {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment mode (default: production)
    pub run_mode: RunMode,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Tokens per client bucket (default: 1000)
    /// Set to 0 to disable rate limiting
    pub rate_limit_capacity: u32,

    /// Time to earn one token back (default: 60ms)
    pub rate_limit_refill_interval: Duration,

    /// How long a rejected client stays rejected (default: 0 = disabled)
    pub rate_limit_penalty: Duration,

    /// Number of independently locked bucket shards (default: 16)
    pub limiter_shards: usize,

    /// Trusted proxy CIDR ranges.
    /// Forwarded headers are only honored from peers inside these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources)
    ///
    /// Common values:
    /// - Private networks: "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16"
    /// - Docker: "172.17.0.0/16" (default bridge network)
    /// - Localhost: "127.0.0.0/8,::1/128"
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Response Cache Configuration
    // =========================================================================
    /// Lifetime of a cached response (default: 1 hour, 0 = never expires)
    pub response_cache_ttl: Duration,

    /// Maximum response body buffered for minification (default: 10MB)
    pub response_buffer_limit: usize,

    /// Serialize concurrent misses for the same key (default: false)
    pub response_cache_single_flight: bool,

    /// Interval of the expired-entry sweep (default: 60s, 0 = disabled)
    pub sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// API key for the `/admin` routes (None = admin routes disabled)
    pub admin_api_key: Option<String>,

    // =========================================================================
    // Request Limits & CORS
    // =========================================================================
    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "edge_layer=debug")
    pub log_level: String,

    /// Log output format (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// combination is invalid (see [`Config::validate`]).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            run_mode: Self::parse_env("APP_ENV", RunMode::Production)?,

            // Rate limiting
            rate_limit_capacity: Self::parse_env("RATE_LIMIT_CAPACITY", 1000)?,
            rate_limit_refill_interval: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_REFILL_INTERVAL_MS",
                60,
            )?),
            rate_limit_penalty: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_PENALTY_MS",
                0,
            )?),
            limiter_shards: Self::parse_env("LIMITER_SHARDS", DEFAULT_SHARDS)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Response cache
            response_cache_ttl: Duration::from_secs(Self::parse_env(
                "RESPONSE_CACHE_TTL_SECS",
                3600,
            )?),
            response_buffer_limit: Self::parse_env("RESPONSE_BUFFER_LIMIT", 10 * 1024 * 1024)?, // 10MB
            response_cache_single_flight: Self::parse_env("RESPONSE_CACHE_SINGLE_FLIGHT", false)?,
            sweep_interval: Duration::from_secs(Self::parse_env("SWEEP_INTERVAL_SECS", 60)?),

            // Security
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),

            // Request limits & CORS
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?, // 1MB
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limiting_enabled() && self.rate_limit_refill_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_REFILL_INTERVAL_MS must be greater than 0 when rate limiting is enabled"
                    .to_string(),
            ));
        }

        if self.limiter_shards == 0 {
            return Err(AppError::ConfigError(
                "LIMITER_SHARDS must be greater than 0".to_string(),
            ));
        }

        if self.response_buffer_limit == 0 {
            return Err(AppError::ConfigError(
                "RESPONSE_BUFFER_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_capacity > 0
    }

    /// Check if the repeat-offender penalty is enabled.
    pub fn penalty_enabled(&self) -> bool {
        !self.rate_limit_penalty.is_zero()
    }

    /// Check if the periodic sweeper should run.
    pub fn sweeper_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }

    /// Check if the admin routes are served.
    pub fn admin_enabled(&self) -> bool {
        self.admin_api_key.is_some()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping blank entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            run_mode: RunMode::Production,
            // Rate limiting
            rate_limit_capacity: 1000,
            rate_limit_refill_interval: Duration::from_millis(60),
            rate_limit_penalty: Duration::ZERO,
            limiter_shards: DEFAULT_SHARDS,
            trusted_proxies: vec![], // Empty = trust all
            // Response cache
            response_cache_ttl: Duration::from_secs(3600),
            response_buffer_limit: 10 * 1024 * 1024, // 10MB
            response_cache_single_flight: false,
            sweep_interval: Duration::from_secs(60),
            // Security
            admin_api_key: None,
            // Request limits & CORS
            max_request_body_size: 1024 * 1024, // 1MB
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.run_mode, RunMode::Production);
        assert_eq!(config.rate_limit_capacity, 1000);
        assert_eq!(config.rate_limit_refill_interval, Duration::from_millis(60));
        assert_eq!(config.response_cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.response_buffer_limit, 10 * 1024 * 1024);
        assert!(!config.response_cache_single_flight);
        assert!(!config.penalty_enabled());
        assert!(config.admin_api_key.is_none());
        assert!(!config.admin_enabled());
    }

    #[test]
    fn test_admin_enabled_with_key() {
        let config = Config {
            admin_api_key: Some("secret-key".to_string()),
            ..Config::default()
        };
        assert!(config.admin_enabled());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:3000");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        let config = Config::default();
        assert!(config.rate_limiting_enabled());

        let config = Config {
            rate_limit_capacity: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!("development".parse::<RunMode>(), Ok(RunMode::Development));
        assert_eq!(" DEV ".parse::<RunMode>(), Ok(RunMode::Development));
        assert_eq!("production".parse::<RunMode>(), Ok(RunMode::Production));
        assert!("staging".parse::<RunMode>().is_err());
        assert!(RunMode::Development.is_development());
        assert_eq!(RunMode::Production.to_string(), "production");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" 10.0.0.0/8 , ,172.16.0.0/12,"),
            vec!["10.0.0.0/8".to_string(), "172.16.0.0/12".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_validate_zero_refill_interval() {
        let config = Config {
            rate_limit_refill_interval: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_REFILL_INTERVAL_MS")
        );
    }

    #[test]
    fn test_validate_zero_refill_interval_ignored_when_disabled() {
        let config = Config {
            rate_limit_capacity: 0,
            rate_limit_refill_interval: Duration::ZERO,
            ..Config::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_shards() {
        let config = Config {
            limiter_shards: 0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("LIMITER_SHARDS"));
    }

    #[test]
    fn test_validate_zero_buffer_limit() {
        let config = Config {
            response_buffer_limit: 0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RESPONSE_BUFFER_LIMIT"));
    }

    #[test]
    fn test_metrics_addr() {
        assert!(Config::default().metrics_addr().is_some());

        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }
}
