//! The hub: single owner of project rooms.
//!
//! Rooms are organized by project ID, allowing targeted broadcast of
//! envelopes to all connections subscribed to one project.
//!
//! ```text
//! Room: project-123    Room: project-456
//! ├── conn-a           ├── conn-d
//! ├── conn-b           └── conn-e
//! └── conn-c
//! ```
//!
//! # Concurrency
//!
//! The room map lives inside [`Hub`] and is touched only by [`Hub::run`].
//! Everyone else holds a [`HubHandle`] and sends commands over one bounded
//! channel, so register, unregister, broadcast and status queries are
//! applied in a single total order. Fan-out uses `try_send` on each
//! connection's bounded queue: a full queue evicts that connection and the
//! broadcast moves on.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{ConnectionId, DomainError, ErrorCode, ProjectId, UserId};
use crate::domain::realtime::{BroadcastEnvelope, CloseReason};
use crate::ports::RealtimeBroadcaster;

/// Default capacity of the hub command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Errors returned by [`HubHandle`] operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// The dispatcher has exited; nothing is routed anymore.
    #[error("Hub is not running")]
    Stopped,
}

impl From<HubError> for DomainError {
    fn from(err: HubError) -> Self {
        DomainError::new(ErrorCode::HubUnavailable, err.to_string())
    }
}

/// Shared close decision for one connection.
///
/// Both connection loops and the hub hold a clone. Whoever closes first
/// records the reason; every holder is woken through the same token.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` (unless one is already recorded) and wakes all waiters.
    ///
    /// Returns true if this call decided the reason.
    pub fn close(&self, reason: CloseReason) -> bool {
        let decided = self.reason.set(reason).is_ok();
        self.token.cancel();
        decided
    }

    /// The recorded reason, if the connection is closing.
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the connection is closing.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// What the hub keeps per connection: routing data, never the socket.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    outbound: mpsc::Sender<Arc<BroadcastEnvelope>>,
    signal: CloseSignal,
}

impl ClientHandle {
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        project_id: ProjectId,
        outbound: mpsc::Sender<Arc<BroadcastEnvelope>>,
        signal: CloseSignal,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            project_id,
            outbound,
            signal,
        }
    }
}

/// One connection as reported by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub project_id: ProjectId,
}

/// Snapshot of one room plus the hub-wide connection count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConnections {
    pub project_id: ProjectId,
    pub total_clients: usize,
    pub matching_clients: usize,
    pub clients: Vec<ConnectionSummary>,
}

/// Hub-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
}

#[derive(Debug)]
enum HubCommand {
    Register {
        client: ClientHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        connection_id: ConnectionId,
    },
    Broadcast {
        project_id: ProjectId,
        envelope: Arc<BroadcastEnvelope>,
    },
    BroadcastReconnect {
        reason: String,
    },
    ProjectConnections {
        project_id: ProjectId,
        reply: oneshot::Sender<ProjectConnections>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable front end to the hub dispatcher.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Add a connection to its project's room.
    ///
    /// Returns after the dispatcher has applied the registration, so every
    /// broadcast dispatched afterwards reaches this connection.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Register { client, ack }).await?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove a connection. Unknown or already removed IDs are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { connection_id }).await
    }

    /// Queue an envelope for every connection in the project's room.
    pub async fn broadcast(
        &self,
        project_id: ProjectId,
        envelope: BroadcastEnvelope,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            project_id,
            envelope: Arc::new(envelope),
        })
        .await
    }

    /// Queue a `reconnect` envelope for every connection in every room.
    pub async fn broadcast_reconnect(&self, reason: impl Into<String>) -> Result<(), HubError> {
        self.send(HubCommand::BroadcastReconnect {
            reason: reason.into(),
        })
        .await
    }

    /// Read-only view of one room.
    pub async fn project_connections(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectConnections, HubError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::ProjectConnections { project_id, reply })
            .await?;
        answer.await.map_err(|_| HubError::Stopped)
    }

    /// Hub-wide room and connection counts.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        answer.await.map_err(|_| HubError::Stopped)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Stopped)
    }
}

#[async_trait]
impl RealtimeBroadcaster for HubHandle {
    async fn broadcast(
        &self,
        project_id: &ProjectId,
        envelope: BroadcastEnvelope,
    ) -> Result<(), DomainError> {
        HubHandle::broadcast(self, *project_id, envelope)
            .await
            .map_err(DomainError::from)
    }

    async fn broadcast_reconnect(&self, reason: &str) -> Result<(), DomainError> {
        HubHandle::broadcast_reconnect(self, reason)
            .await
            .map_err(DomainError::from)
    }
}

/// The dispatcher. Owns the room map; see the module docs.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    rooms: HashMap<ProjectId, HashMap<ConnectionId, ClientHandle>>,
    memberships: HashMap<ConnectionId, ProjectId>,
}

impl Hub {
    /// Create a hub and its handle. Nothing is routed until [`Hub::run`].
    pub fn new(command_capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        let hub = Self {
            commands: rx,
            rooms: HashMap::new(),
            memberships: HashMap::new(),
        };
        (hub, HubHandle { commands: tx })
    }

    /// Create a hub and run it on a background task.
    pub fn spawn(command_capacity: usize, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(command_capacity);
        let task = tokio::spawn(hub.run(shutdown));
        (handle, task)
    }

    /// Dispatch loop. Exits when `shutdown` fires or every handle is dropped,
    /// closing all remaining connections with `ServerShutdown`.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Realtime hub started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        let remaining = self.memberships.len();
        for (_, room) in self.rooms.drain() {
            for (_, client) in room {
                client.signal.close(CloseReason::ServerShutdown);
            }
        }
        self.memberships.clear();

        tracing::info!(closed_connections = remaining, "Realtime hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { client, ack } => {
                self.register(client);
                let _ = ack.send(());
            }
            HubCommand::Unregister { connection_id } => {
                self.unregister(&connection_id);
            }
            HubCommand::Broadcast {
                project_id,
                envelope,
            } => {
                self.broadcast(&project_id, envelope);
            }
            HubCommand::BroadcastReconnect { reason } => {
                self.broadcast_reconnect(&reason);
            }
            HubCommand::ProjectConnections { project_id, reply } => {
                let _ = reply.send(self.project_connections(&project_id));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(HubStats {
                    rooms: self.rooms.len(),
                    connections: self.memberships.len(),
                });
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let connection_id = client.connection_id;
        let project_id = client.project_id;

        // A connection lives in exactly one room.
        if self.memberships.contains_key(&connection_id) {
            self.unregister(&connection_id);
        }

        self.rooms
            .entry(project_id)
            .or_default()
            .insert(connection_id, client);
        self.memberships.insert(connection_id, project_id);

        tracing::debug!(
            connection_id = %connection_id,
            project_id = %project_id,
            total_connections = self.memberships.len(),
            "Connection registered"
        );
    }

    fn unregister(&mut self, connection_id: &ConnectionId) -> Option<ClientHandle> {
        let project_id = self.memberships.remove(connection_id)?;

        let removed = match self.rooms.get_mut(&project_id) {
            Some(room) => {
                let removed = room.remove(connection_id);
                if room.is_empty() {
                    self.rooms.remove(&project_id);
                }
                removed
            }
            None => None,
        };

        tracing::debug!(
            connection_id = %connection_id,
            project_id = %project_id,
            total_connections = self.memberships.len(),
            "Connection unregistered"
        );

        removed
    }

    fn broadcast(&mut self, project_id: &ProjectId, envelope: Arc<BroadcastEnvelope>) {
        let Some(room) = self.rooms.get(project_id) else {
            return;
        };

        let mut evicted = Vec::new();
        let mut gone = Vec::new();

        for (connection_id, client) in room {
            match client.outbound.try_send(Arc::clone(&envelope)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push(*connection_id),
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*connection_id),
            }
        }

        for connection_id in evicted {
            if let Some(client) = self.unregister(&connection_id) {
                tracing::warn!(
                    connection_id = %connection_id,
                    user_id = %client.user_id,
                    project_id = %project_id,
                    envelope_type = %envelope.kind(),
                    "Outbound queue full, evicting slow connection"
                );
                client.signal.close(CloseReason::SlowConsumer);
            }
        }

        for connection_id in gone {
            self.unregister(&connection_id);
        }
    }

    fn broadcast_reconnect(&mut self, reason: &str) {
        let project_ids: Vec<ProjectId> = self.rooms.keys().copied().collect();

        tracing::info!(
            rooms = project_ids.len(),
            connections = self.memberships.len(),
            reason,
            "Broadcasting reconnect to all rooms"
        );

        for project_id in project_ids {
            let envelope = Arc::new(BroadcastEnvelope::reconnect(project_id, reason));
            self.broadcast(&project_id, envelope);
        }
    }

    fn project_connections(&self, project_id: &ProjectId) -> ProjectConnections {
        let clients: Vec<ConnectionSummary> = self
            .rooms
            .get(project_id)
            .map(|room| {
                room.values()
                    .map(|client| ConnectionSummary {
                        connection_id: client.connection_id,
                        user_id: client.user_id.clone(),
                        project_id: client.project_id,
                    })
                    .collect()
            })
            .unwrap_or_default();

        ProjectConnections {
            project_id: *project_id,
            total_clients: self.memberships.len(),
            matching_clients: clients.len(),
            clients,
        }
    }
}
