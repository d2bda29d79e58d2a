//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `auth` - Session token validation (JWT, mock)
//! - `membership` - In-memory project access checker
//! - `postgres` - Project access and LISTEN/NOTIFY change feed
//! - `websocket` - Upgrade handling, hub and per-connection actors

pub mod auth;
pub mod membership;
pub mod postgres;
pub mod websocket;

pub use auth::{JwtSessionValidator, MockSessionValidator};
pub use membership::StubAccessChecker;
pub use postgres::{PgChangeFeed, PostgresProjectAccessChecker};
pub use websocket::{ChangeNotifierBridge, Hub, HubHandle, WebSocketState};
