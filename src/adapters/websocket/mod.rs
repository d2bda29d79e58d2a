//! WebSocket adapters for real-time project updates.
//!
//! Pushes cache invalidations and domain events to every client connected
//! to a project.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      PostgreSQL NOTIFY                               │
//! │   one JSON payload per committed row change                         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ listens (ChangeFeed)
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    ChangeNotifierBridge                              │
//! │   - Decodes payloads into ChangeNotification                        │
//! │   - Reconnects with backoff, then announces `reconnect`             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ broadcasts (HubHandle)
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Hub                                        │
//! │   Room: project-a      Room: project-b      Room: project-c         │
//! │   ├── conn-1           ├── conn-4           └── conn-6              │
//! │   ├── conn-2           └── conn-5                                    │
//! │   └── conn-3                                                         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ bounded queue per connection
//!                                     ▼
//!                         ClientSession (read + write loops)
//! ```
//!
//! # Components
//!
//! - [`credentials`] - Ordered bearer credential sources
//! - [`authenticator`] - Pre-upgrade authentication and membership re-check
//! - [`hub`] - Room registry and dispatcher actor
//! - [`client`] - Per-connection read/write loops
//! - [`messages`] - Wire format
//! - [`change_notifier`] - Change feed to hub bridge
//! - [`handler`] - Axum upgrade and status handlers

pub mod authenticator;
pub mod change_notifier;
pub mod client;
pub mod credentials;
pub mod handler;
pub mod hub;
pub mod messages;

pub use authenticator::{ConnectionAuthenticator, UpgradeRejection};
pub use change_notifier::{ChangeNotifierBridge, ChangeNotifierConfig, NotifierExit};
pub use client::{ClientSession, ClientSettings};
pub use credentials::{resolve_credential, Credential, CredentialSource};
pub use handler::{websocket_router, ws_handler, ws_status_handler, WebSocketState};
pub use hub::{
    ClientHandle, CloseSignal, Hub, HubError, HubHandle, HubStats, ProjectConnections,
    DEFAULT_COMMAND_CAPACITY,
};
pub use messages::{encode_envelope, ClientMessage, ServerMessage};
