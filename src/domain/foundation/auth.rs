//! Authentication types for the domain layer.
//!
//! These types represent an authenticated caller extracted from a bearer
//! token. Any token adapter (HS256 JWT in production, a mock in tests)
//! populates them via the `SessionValidator` port.

use super::UserId;
use thiserror::Error;

/// Authenticated user extracted from a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The unique user identifier (`sub` claim).
    pub id: UserId,

    /// User's email address, when the token carries one.
    pub email: Option<String>,
}

impl AuthenticatedUser {
    /// Creates a new authenticated user.
    pub fn new(id: UserId, email: Option<String>) -> Self {
        Self { id, email }
    }
}

/// Authentication errors that can occur during token validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented by any supported source.
    #[error("Missing credential")]
    MissingCredential,

    /// The token is malformed or has an invalid signature.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The token has expired (separate from InvalidToken for specific handling).
    #[error("Token expired")]
    TokenExpired,

    /// The authentication backend is unavailable or did not answer in time.
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}
