//! Real-time domain types: change notifications, broadcast envelopes and the
//! connection lifecycle.

mod change;
mod connection;
mod envelope;

pub use change::{ChangeAction, ChangeDecodeError, ChangeNotification, ResourceKind};
pub use connection::{CloseReason, ConnectionState};
pub use envelope::{BroadcastEnvelope, EnvelopeKind, CACHE_INVALIDATE, RECONNECT};
