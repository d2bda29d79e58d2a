//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `TEAMBOARD` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use teamboard::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod auth;
mod database;
mod error;
mod realtime;
mod server;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::RealtimeConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Authentication configuration (session tokens)
    pub auth: AuthConfig,

    /// Hub, connection and change-notifier tuning
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `TEAMBOARD` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `TEAMBOARD__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `TEAMBOARD__REALTIME__PING_INTERVAL_SECS=15` -> `realtime.ping_interval_secs = 15`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("TEAMBOARD")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.realtime.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn set_minimal_env() {
        env::set_var("TEAMBOARD__DATABASE__URL", "postgresql://test@localhost/test");
        env::set_var("TEAMBOARD__AUTH__JWT_SECRET", "dev-secret");
    }

    fn clear_env() {
        env::remove_var("TEAMBOARD__DATABASE__URL");
        env::remove_var("TEAMBOARD__AUTH__JWT_SECRET");
        env::remove_var("TEAMBOARD__SERVER__PORT");
        env::remove_var("TEAMBOARD__SERVER__ENVIRONMENT");
        env::remove_var("TEAMBOARD__REALTIME__OUTBOUND_QUEUE_CAPACITY");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.database.url, "postgresql://test@localhost/test");
        assert_eq!(config.realtime.outbound_queue_capacity, 256);
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_secret_fails_in_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("TEAMBOARD__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
        assert_eq!(config.validate(), Err(ValidationError::JwtSecretTooShort));
    }

    #[test]
    fn test_nested_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("TEAMBOARD__SERVER__PORT", "3000");
        env::set_var("TEAMBOARD__REALTIME__OUTBOUND_QUEUE_CAPACITY", "16");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.realtime.outbound_queue_capacity, 16);
    }

    #[test]
    fn test_missing_secret_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TEAMBOARD__DATABASE__URL", "postgresql://test@localhost/test");
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_err());
    }
}
