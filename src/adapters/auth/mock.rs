//! Mock session validator for testing.
//!
//! Implements the `SessionValidator` port without signing real tokens.
//!
//! # Example
//!
//! ```ignore
//! use teamboard::adapters::auth::MockSessionValidator;
//!
//! let validator = MockSessionValidator::new()
//!     .with_test_user("valid-token", "user-123")
//!     .with_expired_token("stale-token");
//!
//! let result = validator.validate("valid-token").await;
//! assert!(result.is_ok());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Mock session validator for testing.
///
/// Stores a map of tokens to users. Tokens not in the map return `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    /// Map of valid tokens to their associated users
    tokens: RwLock<HashMap<String, AuthenticatedUser>>,
    /// Tokens that validate as expired
    expired: RwLock<HashSet<String>>,
    /// Optional error to return for all validations (for error testing)
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    /// Creates a new empty mock validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user.
    pub fn with_user(self, token: impl Into<String>, user: AuthenticatedUser) -> Self {
        self.add_token(token, user);
        self
    }

    /// Adds a valid token for a user with the given ID and a test email.
    pub fn with_test_user(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let email = format!("{}@test.example.com", user_id);
        match UserId::new(user_id) {
            Ok(id) => self.with_user(token, AuthenticatedUser::new(id, Some(email))),
            Err(_) => self,
        }
    }

    /// Adds a token that validates as expired.
    pub fn with_expired_token(self, token: impl Into<String>) -> Self {
        if let Ok(mut expired) = self.expired.write() {
            expired.insert(token.into());
        }
        self
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        if let Ok(mut forced) = self.force_error.write() {
            *forced = Some(error);
        }
        self
    }

    /// Clears the forced error and returns to normal operation.
    pub fn clear_error(&self) {
        if let Ok(mut forced) = self.force_error.write() {
            *forced = None;
        }
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, user: AuthenticatedUser) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.into(), user);
        }
    }

    /// Removes a token, making it invalid.
    pub fn remove_token(&self, token: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(token);
        }
    }

    /// Returns the number of registered valid tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let forced = self
            .force_error
            .read()
            .map_err(|_| AuthError::service_unavailable("mock validator poisoned"))?
            .clone();
        if let Some(error) = forced {
            return Err(error);
        }

        let is_expired = self
            .expired
            .read()
            .map(|expired| expired.contains(token))
            .unwrap_or(false);
        if is_expired {
            return Err(AuthError::TokenExpired);
        }

        self.tokens
            .read()
            .map_err(|_| AuthError::service_unavailable("mock validator poisoned"))?
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
