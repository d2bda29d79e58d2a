//! RealtimeBroadcaster port - how the rest of the backend pushes events to
//! connected clients.
//!
//! REST handlers (e.g. "message created") and the change notifier depend on
//! this trait rather than on the hub, so they can be exercised against a
//! recording fake.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ProjectId};
use crate::domain::realtime::BroadcastEnvelope;

/// Fan-out of envelopes to project rooms.
#[async_trait]
pub trait RealtimeBroadcaster: Send + Sync {
    /// Deliver an envelope to every connection currently in the project's room.
    ///
    /// Returns once the broadcast is queued for dispatch; delivery to each
    /// connection is best effort.
    async fn broadcast(
        &self,
        project_id: &ProjectId,
        envelope: BroadcastEnvelope,
    ) -> Result<(), DomainError>;

    /// Send a `reconnect` envelope to every connected client in every room.
    async fn broadcast_reconnect(&self, reason: &str) -> Result<(), DomainError>;
}
