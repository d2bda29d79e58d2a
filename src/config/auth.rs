//! Authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use super::server::Environment;

/// Minimum HMAC secret length accepted in production.
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Authentication configuration (HS256 session tokens)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret used to verify session token signatures
    pub jwt_secret: SecretString,

    /// Expected `iss` claim, if any
    pub issuer: Option<String>,

    /// Expected `aud` claim, if any
    pub audience: Option<String>,

    /// Upper bound on credential validation during the handshake
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Clock skew tolerated when checking `exp`
    #[serde(default)]
    pub leeway_secs: u64,
}

impl AuthConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Validate authentication configuration
    ///
    /// In production, the secret must be long enough to resist brute force.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        if *environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ValidationError::JwtSecretTooShort);
        }
        if self.auth_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("auth_timeout_secs"));
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::new(String::new()),
            issuer: None,
            audience: None,
            auth_timeout_secs: default_auth_timeout(),
            leeway_secs: 0,
        }
    }
}

fn default_auth_timeout() -> u64 {
    5
}
