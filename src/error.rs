//! Error types for the Slidegate service.

use thiserror::Error;

/// Main error type for Slidegate operations.
///
/// Exceeding a rate limit is not an error; it is reported through
/// [`Decision::Denied`](crate::ratelimit::Decision::Denied).
#[derive(Error, Debug)]
pub enum SlidegateError {
    /// Invalid settings, detected at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration could not be assembled or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, SlidegateError>;
