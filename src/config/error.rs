//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Host and port do not form a socket address")]
    InvalidBindAddress,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("JWT secret must be at least 32 bytes in production")]
    JwtSecretTooShort,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("pong_timeout_secs must exceed ping_interval_secs")]
    PongTimeoutTooShort,

    #[error("reconnect_max_backoff_ms must be at least reconnect_initial_backoff_ms")]
    InvalidBackoffRange,

    #[error("notify_channel must be a plain SQL identifier")]
    InvalidNotifyChannel,
}
