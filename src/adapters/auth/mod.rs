//! Authentication adapters.
//!
//! Implementations of the `SessionValidator` port:
//!
//! - `jwt` - HS256 session token validation (production)
//! - `mock` - Test implementation that doesn't require signed tokens

mod jwt;
mod mock;

pub use jwt::JwtSessionValidator;
pub use mock::MockSessionValidator;
