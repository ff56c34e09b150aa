//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Signed header sets must always cover these pseudo-headers.
pub const REQUIRED_GET_HEADERS: &[&str] = &["(request-target)", "date"];
pub const REQUIRED_POST_HEADERS: &[&str] = &["(request-target)", "date", "digest"];

/// Signature algorithms the transport can emit.
pub const SUPPORTED_SIGNATURE_ALGORITHMS: &[&str] = &["rsa-sha256", "hs2019"];

/// The only digest algorithm the Digest header supports here.
pub const SUPPORTED_DIGEST_ALGORITHM: &str = "SHA-256";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Outbound transport configuration
///
/// One shared rate limiter bounds aggregate outbound QPS across every
/// signing transport the controller hands out.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Application token included in the User-Agent header,
    /// e.g. "myapp/1.2" becomes "myapp/1.2 (fedgate/0.1.0)"
    pub application: String,
    /// Shared token-bucket refill rate, tokens per second
    pub rate_limit_per_sec: f64,
    /// Shared token-bucket burst size
    pub rate_limit_burst: u32,
    /// Signature algorithms, first entry is emitted in the Signature header
    pub signature_algorithms: Vec<String>,
    /// Body digest algorithm for the Digest header
    pub digest_algorithm: String,
    /// Signed header set for GET requests (dereference)
    pub get_headers: Vec<String>,
    /// Signed header set for POST requests (delivery)
    pub post_headers: Vec<String>,
    /// Concurrency bound for batch delivery fan-out
    pub max_parallel_deliveries: usize,
    /// Per-request timeout in seconds for the underlying HTTP client
    pub request_timeout_seconds: u64,
}

impl TransportConfig {
    /// Construction-time validation for everything the signing pipeline
    /// depends on. A controller refuses to build from an invalid config.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.application.trim().is_empty() {
            return Err(AppError::Config(
                "transport.application must not be empty".to_string(),
            ));
        }

        if self.rate_limit_per_sec <= 0.0 {
            return Err(AppError::Config(
                "transport.rate_limit_per_sec must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit_burst == 0 {
            return Err(AppError::Config(
                "transport.rate_limit_burst must be greater than zero".to_string(),
            ));
        }

        if self.signature_algorithms.is_empty() {
            return Err(AppError::Config(
                "transport.signature_algorithms must not be empty".to_string(),
            ));
        }

        for algorithm in &self.signature_algorithms {
            if !SUPPORTED_SIGNATURE_ALGORITHMS.contains(&algorithm.as_str()) {
                return Err(AppError::Config(format!(
                    "unsupported signature algorithm: {}",
                    algorithm
                )));
            }
        }

        if self.digest_algorithm != SUPPORTED_DIGEST_ALGORITHM {
            return Err(AppError::Config(format!(
                "unsupported digest algorithm: {}",
                self.digest_algorithm
            )));
        }

        Self::validate_header_set("transport.get_headers", &self.get_headers, REQUIRED_GET_HEADERS)?;
        Self::validate_header_set(
            "transport.post_headers",
            &self.post_headers,
            REQUIRED_POST_HEADERS,
        )?;

        if self.max_parallel_deliveries == 0 {
            return Err(AppError::Config(
                "transport.max_parallel_deliveries must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_header_set(
        field: &str,
        headers: &[String],
        required: &[&str],
    ) -> Result<(), crate::error::AppError> {
        for name in required {
            if !headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                return Err(crate::error::AppError::Config(format!(
                    "{} must include {}",
                    field, name
                )));
            }
        }
        Ok(())
    }

    /// Full User-Agent value identifying the application and the framework.
    pub fn user_agent(&self) -> String {
        format!(
            "{} (fedgate/{})",
            self.application,
            env!("CARGO_PKG_VERSION")
        )
    }
}

impl Default for TransportConfig {
    /// Mirrors the defaults `AppConfig::load` seeds before file and
    /// environment overrides.
    fn default() -> Self {
        Self {
            application: "fedgate".to_string(),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 20,
            signature_algorithms: vec!["rsa-sha256".to_string()],
            digest_algorithm: SUPPORTED_DIGEST_ALGORITHM.to_string(),
            get_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
            ],
            post_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
                "digest".to_string(),
            ],
            max_parallel_deliveries: 10,
            request_timeout_seconds: 30,
        }
    }
}

/// Retry sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Seconds between failed-delivery sweeps
    pub interval_seconds: u64,
    /// Rows fetched per page during a sweep
    pub page_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format ("pretty" or "json")
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDGATE_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("database.path", "data/fedgate.db")?
            .set_default("transport.application", "fedgate")?
            .set_default("transport.rate_limit_per_sec", 10.0)?
            .set_default("transport.rate_limit_burst", 20)?
            .set_default(
                "transport.signature_algorithms",
                vec!["rsa-sha256".to_string()],
            )?
            .set_default("transport.digest_algorithm", "SHA-256")?
            .set_default(
                "transport.get_headers",
                vec![
                    "(request-target)".to_string(),
                    "host".to_string(),
                    "date".to_string(),
                ],
            )?
            .set_default(
                "transport.post_headers",
                vec![
                    "(request-target)".to_string(),
                    "host".to_string(),
                    "date".to_string(),
                    "digest".to_string(),
                ],
            )?
            .set_default("transport.max_parallel_deliveries", 10)?
            .set_default("transport.request_timeout_seconds", 30)?
            .set_default("retry.interval_seconds", 300)?
            .set_default("retry.page_size", 50)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDGATE_*)
            .add_source(
                Environment::with_prefix("FEDGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        self.transport.validate()?;

        if self.retry.page_size == 0 {
            return Err(crate::error::AppError::Config(
                "retry.page_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_transport_config() -> TransportConfig {
        TransportConfig {
            application: "testapp/0.1".to_string(),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 20,
            signature_algorithms: vec!["rsa-sha256".to_string()],
            digest_algorithm: "SHA-256".to_string(),
            get_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
            ],
            post_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
                "digest".to_string(),
            ],
            max_parallel_deliveries: 10,
            request_timeout_seconds: 30,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_transport_config().validate().is_ok());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let mut config = valid_transport_config();
        config.rate_limit_per_sec = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_burst_is_rejected() {
        let mut config = valid_transport_config();
        config.rate_limit_burst = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_algorithm_list_is_rejected() {
        let mut config = valid_transport_config();
        config.signature_algorithms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut config = valid_transport_config();
        config.signature_algorithms = vec!["ed25519-sha512".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_digest_algorithm_is_rejected() {
        let mut config = valid_transport_config();
        config.digest_algorithm = "MD5".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn post_headers_without_digest_are_rejected() {
        let mut config = valid_transport_config();
        config.post_headers = vec![
            "(request-target)".to_string(),
            "host".to_string(),
            "date".to_string(),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn get_headers_without_request_target_are_rejected() {
        let mut config = valid_transport_config();
        config.get_headers = vec!["host".to_string(), "date".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn user_agent_names_application_and_framework() {
        let config = valid_transport_config();
        let user_agent = config.user_agent();
        assert!(user_agent.starts_with("testapp/0.1 (fedgate/"));
    }
}
