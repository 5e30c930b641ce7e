//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development. A `.env` file in the working directory is read
//! first when present.
//!
//! # Security Configuration
//!
//! - `AUTH_TOKENS`: `token:subject` pairs, comma-separated. When set, bearer
//!   authentication is required everywhere except `AUTH_BYPASS_PATHS`
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*`)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarding headers are believed
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_REQUESTS`: Requests per client per window (default: 100, 0 disables)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 60)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
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

    /// Maximum request body size in bytes (default: 10MB).
    /// Larger bodies are refused with 413 before dispatch.
    pub max_request_body_size: usize,

    /// Upper bound on a single request, chain included (default: 30 seconds)
    pub request_timeout: Duration,

    /// Time in-flight requests get to finish after shutdown starts (default: 10 seconds)
    pub shutdown_grace_period: Duration,

    /// Directory served under `/static` (default: unset)
    pub static_dir: Option<PathBuf>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests per client per window (default: 100).
    /// Set to 0 to disable rate limiting.
    pub rate_limit_requests: u32,

    /// Fixed window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// `(token, subject)` pairs accepted by bearer auth. Empty disables auth.
    pub auth_tokens: Vec<(String, String)>,

    /// Paths that bypass authentication (default: ["/health"])
    pub auth_bypass_paths: Vec<String>,

    /// Allowed CORS origins. `*` allows all.
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources - NOT recommended for production)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter directive (e.g., "info", "waypoint=debug")
    pub log_level: String,

    /// Log line format (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or
    /// validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB
            request_timeout: Duration::from_secs(Self::parse_env("REQUEST_TIMEOUT_SECS", 30)?),
            shutdown_grace_period: Duration::from_secs(Self::parse_env("SHUTDOWN_GRACE_SECS", 10)?),
            static_dir: env::var("STATIC_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),

            // Rate limiting
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),

            // Security
            auth_tokens: Self::parse_auth_tokens(&env::var("AUTH_TOKENS").unwrap_or_default())?,
            auth_bypass_paths: Self::parse_auth_bypass_paths(),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_requests > 0
    }

    pub fn auth_enabled(&self) -> bool {
        !self.auth_tokens.is_empty()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list with blanks dropped.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse auth bypass paths. Entries not starting with `/` are ignored.
    fn parse_auth_bypass_paths() -> Vec<String> {
        Self::parse_list("AUTH_BYPASS_PATHS", "/health")
            .into_iter()
            .filter(|s| s.starts_with('/'))
            .collect()
    }

    /// Parse `token:subject,token:subject`.
    fn parse_auth_tokens(raw: &str) -> AppResult<Vec<(String, String)>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((token, subject)) if !token.is_empty() && !subject.is_empty() => {
                    Ok((token.to_string(), subject.to_string()))
                }
                _ => Err(AppError::ConfigError(
                    "Invalid AUTH_TOKENS: expected token:subject pairs".to_string(),
                )),
            })
            .collect()
    }
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
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(10),
            static_dir: None,
            // Rate limiting
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            // Security
            auth_tokens: vec![],
            auth_bypass_paths: vec!["/health".to_string()],
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 0,
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
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.max_request_body_size, 10 * 1024 * 1024);
        assert!(!config.auth_enabled());
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "192.168.1.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "192.168.1.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_requests: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_WINDOW_SECS")
        );
    }

    #[test]
    fn test_validate_zero_body_size() {
        let config = Config {
            max_request_body_size: 0,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("MAX_REQUEST_BODY_SIZE")
        );
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            request_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_auth_tokens() {
        let tokens = Config::parse_auth_tokens(" abc:alice , def:bob ,").unwrap();
        assert_eq!(
            tokens,
            vec![
                ("abc".to_string(), "alice".to_string()),
                ("def".to_string(), "bob".to_string()),
            ]
        );
        assert!(Config::parse_auth_tokens("").unwrap().is_empty());
        assert!(Config::parse_auth_tokens("no-subject").is_err());
        assert!(Config::parse_auth_tokens(":alice").is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_metrics_addr() {
        let config = Config {
            metrics_port: 9090,
            ..Config::default()
        };
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
    }
}
