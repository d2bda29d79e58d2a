//! HS256 session token validator.
//!
//! Verifies tokens issued by the REST login flow: signature against the
//! shared secret, expiry (with configurable leeway), and issuer/audience
//! when configured. Issuance lives elsewhere.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Claims carried by a session token.
#[derive(Debug, Deserialize)]
struct SessionClaims {
    /// Subject (user ID)
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Validates HS256 session tokens against a shared secret.
pub struct JwtSessionValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionValidator {
    pub fn new(
        secret: &SecretString,
        issuer: Option<&str>,
        audience: Option<&str>,
        leeway_secs: u64,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.issuer.as_deref(),
            config.audience.as_deref(),
            config.leeway_secs,
        )
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    ErrorKind::InvalidIssuer => {
                        tracing::warn!("Invalid issuer in token");
                        AuthError::InvalidToken
                    }
                    ErrorKind::InvalidAudience => {
                        tracing::warn!("Invalid audience in token");
                        AuthError::InvalidToken
                    }
                    _ => {
                        tracing::debug!("Token validation failed: {}", e);
                        AuthError::InvalidToken
                    }
                }
            },
        )?;

        let user_id = UserId::new(data.claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthenticatedUser::new(user_id, data.claims.email))
    }
}
