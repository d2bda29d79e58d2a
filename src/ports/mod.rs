//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Connection Ports
//!
//! - `SessionValidator` - Bearer token validation
//! - `ProjectAccessChecker` - Project membership re-check before joining a room
//!
//! ## Real-time Ports
//!
//! - `RealtimeBroadcaster` - Fan-out of envelopes to project rooms
//! - `ChangeFeed` / `ChangeStream` - Store commit notifications

mod change_feed;
mod project_access;
mod realtime_broadcaster;
mod session_validator;

pub use change_feed::{ChangeFeed, ChangeFeedError, ChangeStream};
pub use project_access::{ProjectAccess, ProjectAccessChecker};
pub use realtime_broadcaster::RealtimeBroadcaster;
pub use session_validator::SessionValidator;
