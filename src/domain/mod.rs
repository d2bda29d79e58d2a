//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, auth, errors)
//! - `realtime` - Change notifications, broadcast envelopes, connection lifecycle

pub mod foundation;
pub mod realtime;
