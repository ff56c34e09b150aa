//! Error types for Fedgate
//!
//! All errors in the crate are converted to `AppError`. Host applications
//! embedding the core map these onto their own HTTP or job-queue surfaces.

use thiserror::Error;

/// Crate-wide error type
///
/// The four kinds that matter to correctness are `Validation` (a policy or
/// matcher is malformed and must be rejected before evaluation), `Evaluation`
/// (matcher evaluation failed; accumulated, never hides sibling failures),
/// `Federation` (a transport attempt failed; recorded on the delivery attempt
/// and returned), and `Consistency` (a store mutation affected zero or more
/// than one row, which is a broken invariant and never ignored).
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Validation error (malformed policy, matcher, key, or URL)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Matcher/policy evaluation error (accumulated across siblings)
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation transport error (network failure or non-success status)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Store-consistency error (a row transition affected != 1 rows)
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
