//! Session validation port for bearer token validation.
//!
//! This port defines the contract for validating access tokens and extracting
//! user identity. Token issuance lives in the auth collaborator; the hub only
//! validates.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Validates access tokens and extracts user identity.
///
/// # Contract
///
/// Implementations must:
/// - Validate the token signature
/// - Validate expiry (and issuer/audience when configured)
/// - Return `AuthError::InvalidToken` for malformed/bad signature tokens
/// - Return `AuthError::TokenExpired` for expired tokens
/// - Return `AuthError::ServiceUnavailable` for transient errors
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate an access token (without "Bearer " prefix) and return the
    /// authenticated user.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
