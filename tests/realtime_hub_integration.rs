//! Integration tests for the realtime hub.
//!
//! These tests verify the end-to-end flow:
//! 1. Connections register into per-project rooms
//! 2. Broadcasts reach exactly the room's members, in order
//! 3. A stalled consumer is evicted without holding up its room
//! 4. The change notifier turns store notifications into invalidations and
//!    announces `reconnect` once after the feed recovers
//!
//! Uses in-memory channels and a scripted change feed; no database or
//! network required.

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use teamboard::adapters::websocket::{
    ChangeNotifierBridge, ClientHandle, ClientSession, ClientSettings, CloseSignal, Hub,
    HubHandle, HubStats, DEFAULT_COMMAND_CAPACITY,
};
use teamboard::domain::foundation::{ConnectionId, ProjectId, UserId};
use teamboard::domain::realtime::{
    BroadcastEnvelope, ChangeAction, CloseReason, EnvelopeKind, ResourceKind,
};
use teamboard::ports::{ChangeFeed, ChangeFeedError, ChangeStream};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// A registered connection seen from the hub's side.
struct TestClient {
    id: ConnectionId,
    inbox: mpsc::Receiver<Arc<BroadcastEnvelope>>,
    signal: CloseSignal,
}

async fn join(hub: &HubHandle, project_id: ProjectId, capacity: usize) -> TestClient {
    let (tx, inbox) = mpsc::channel(capacity);
    let signal = CloseSignal::new();
    let id = ConnectionId::new();
    hub.register(ClientHandle::new(
        id,
        UserId::new("member").unwrap(),
        project_id,
        tx,
        signal.clone(),
    ))
    .await
    .unwrap();
    TestClient { id, inbox, signal }
}

fn task_event(project_id: ProjectId, n: usize) -> BroadcastEnvelope {
    BroadcastEnvelope::event("task_moved", project_id, serde_json::json!({ "n": n }))
        .unwrap()
        .about(ResourceKind::Task, ChangeAction::Update, format!("task-{}", n))
}

async fn recv(client: &mut TestClient) -> Arc<BroadcastEnvelope> {
    tokio::time::timeout(Duration::from_secs(2), client.inbox.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("queue closed")
}

/// Scripted change feed: each entry is one connection attempt.
struct ScriptedFeed {
    attempts: Mutex<VecDeque<Option<Vec<String>>>>,
    hold_last: bool,
}

impl ScriptedFeed {
    /// `None` refuses the attempt; `Some(payloads)` yields them and drops,
    /// except the last attempt which stays open when `hold_last` is set.
    fn new(attempts: Vec<Option<Vec<String>>>, hold_last: bool) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(attempts.into()),
            hold_last,
        })
    }
}

struct ScriptedStream {
    payloads: VecDeque<String>,
    hold: bool,
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError> {
        let (attempt, is_last) = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.pop_front();
            (attempt, attempts.is_empty())
        };
        match attempt {
            Some(Some(payloads)) => Ok(Box::new(ScriptedStream {
                payloads: payloads.into(),
                hold: is_last && self.hold_last,
            })),
            Some(None) => Err(ChangeFeedError::Connect("connection refused".to_string())),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ChangeStream for ScriptedStream {
    async fn next_payload(&mut self) -> Result<String, ChangeFeedError> {
        match self.payloads.pop_front() {
            Some(payload) => Ok(payload),
            None if self.hold => std::future::pending().await,
            None => Err(ChangeFeedError::Disconnected("server closed".to_string())),
        }
    }
}

fn task_payload(project_id: ProjectId, id: &str) -> String {
    serde_json::json!({
        "table": "tasks",
        "action": "UPDATE",
        "project_id": project_id.to_string(),
        "id": id,
    })
    .to_string()
}

// =============================================================================
// Hub Routing
// =============================================================================

#[tokio::test]
async fn broadcasts_stay_inside_their_project() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let alpha = ProjectId::new();
    let beta = ProjectId::new();

    let mut a1 = join(&hub, alpha, 8).await;
    let mut a2 = join(&hub, alpha, 8).await;
    let mut b1 = join(&hub, beta, 8).await;

    hub.broadcast(alpha, task_event(alpha, 1)).await.unwrap();
    hub.broadcast(beta, task_event(beta, 2)).await.unwrap();

    assert_eq!(recv(&mut a1).await.id(), Some("task-1"));
    assert_eq!(recv(&mut a2).await.id(), Some("task-1"));
    assert_eq!(recv(&mut b1).await.id(), Some("task-2"));

    // Round-trip through the dispatcher so nothing is still in flight.
    hub.stats().await.unwrap();
    assert!(a1.inbox.try_recv().is_err());
    assert!(b1.inbox.try_recv().is_err());
}

#[tokio::test]
async fn slow_consumer_is_evicted_while_room_keeps_flowing() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let project = ProjectId::new();

    let stalled = join(&hub, project, 1).await;
    let mut healthy = join(&hub, project, 64).await;

    for n in 0..50 {
        hub.broadcast(project, task_event(project, n)).await.unwrap();
    }

    for n in 0..50 {
        let envelope = recv(&mut healthy).await;
        assert_eq!(envelope.id(), Some(format!("task-{}", n).as_str()));
    }

    assert_eq!(stalled.signal.reason(), Some(CloseReason::SlowConsumer));
    let snapshot = hub.project_connections(project).await.unwrap();
    assert_eq!(snapshot.total_clients, 1);
    assert_eq!(snapshot.clients[0].connection_id, healthy.id);
}

#[tokio::test]
async fn concurrent_joins_and_leaves_are_counted_exactly() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let project = ProjectId::new();

    let joins: Vec<_> = (0..20)
        .map(|_| {
            let hub = hub.clone();
            tokio::spawn(async move { join(&hub, project, 4).await })
        })
        .collect();
    let mut clients = Vec::new();
    for handle in joins {
        clients.push(handle.await.unwrap());
    }

    assert_eq!(
        hub.stats().await.unwrap(),
        HubStats {
            rooms: 1,
            connections: 20
        }
    );

    let leaves: Vec<_> = clients
        .iter()
        .map(|client| {
            let hub = hub.clone();
            let id = client.id;
            tokio::spawn(async move { hub.unregister(id).await })
        })
        .collect();
    for handle in leaves {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(hub.stats().await.unwrap(), HubStats::default());
}

#[tokio::test]
async fn unregistering_twice_is_harmless() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let project = ProjectId::new();
    let leaving = join(&hub, project, 4).await;
    let mut staying = join(&hub, project, 4).await;

    hub.unregister(leaving.id).await.unwrap();
    hub.unregister(leaving.id).await.unwrap();
    hub.unregister(ConnectionId::new()).await.unwrap();

    hub.broadcast(project, task_event(project, 7)).await.unwrap();
    assert_eq!(recv(&mut staying).await.id(), Some("task-7"));
    assert_eq!(hub.stats().await.unwrap().connections, 1);
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let shutdown = CancellationToken::new();
    let (hub, task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, shutdown.clone());
    let first = join(&hub, ProjectId::new(), 4).await;
    let second = join(&hub, ProjectId::new(), 4).await;

    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(first.signal.reason(), Some(CloseReason::ServerShutdown));
    assert_eq!(second.signal.reason(), Some(CloseReason::ServerShutdown));
    assert!(hub.stats().await.is_err());
}

// =============================================================================
// Change Notifier
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reconnect_is_announced_once_before_next_invalidation() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let project = ProjectId::new();
    let mut client = join(&hub, project, 16).await;

    let feed = ScriptedFeed::new(
        vec![
            Some(vec![task_payload(project, "before")]),
            None,
            Some(vec![task_payload(project, "after")]),
        ],
        true,
    );
    let shutdown = CancellationToken::new();
    let notifier =
        ChangeNotifierBridge::new(feed, Arc::new(hub.clone())).spawn(shutdown.clone());

    let first = recv(&mut client).await;
    assert_eq!(first.kind(), &EnvelopeKind::CacheInvalidate);
    assert_eq!(first.id(), Some("before"));

    let announcement = recv(&mut client).await;
    assert_eq!(announcement.kind(), &EnvelopeKind::Reconnect);
    assert_eq!(announcement.project_id(), project);
    assert!(announcement.reason().is_some());

    let next = recv(&mut client).await;
    assert_eq!(next.kind(), &EnvelopeKind::CacheInvalidate);
    assert_eq!(next.id(), Some("after"));
    assert_eq!(next.resource(), Some(ResourceKind::Task));

    shutdown.cancel();
    notifier.await.unwrap();
    assert!(client.inbox.try_recv().is_err());
}

#[tokio::test]
async fn store_change_reaches_a_live_socket() {
    let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
    let project = ProjectId::new();

    let (server_tx, mut from_server) = fmpsc::unbounded::<Message>();
    let (to_server, server_rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
    let session = ClientSession::new(
        UserId::new("alice").unwrap(),
        project,
        hub.clone(),
        ClientSettings::default(),
    );
    let connection = tokio::spawn(session.run(server_tx, server_rx));

    let connected = next_json(&mut from_server).await;
    assert_eq!(connected["type"], "connected");

    let feed = ScriptedFeed::new(vec![Some(vec![task_payload(project, "t-9")])], true);
    let shutdown = CancellationToken::new();
    let notifier =
        ChangeNotifierBridge::new(feed, Arc::new(hub.clone())).spawn(shutdown.clone());

    let invalidation = next_json(&mut from_server).await;
    assert_eq!(invalidation["type"], "cache_invalidate");
    assert_eq!(invalidation["resource"], "task");
    assert_eq!(invalidation["action"], "UPDATE");
    assert_eq!(invalidation["project_id"], project.to_string());
    assert_eq!(invalidation["data"]["id"], "t-9");

    shutdown.cancel();
    notifier.await.unwrap();

    to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
    let reason = tokio::time::timeout(Duration::from_secs(2), connection)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, CloseReason::ClientClosed);
    assert_eq!(hub.stats().await.unwrap(), HubStats::default());
}

async fn next_json(rx: &mut fmpsc::UnboundedReceiver<Message>) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("timed out waiting for frame")
            .expect("server closed the stream");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}
