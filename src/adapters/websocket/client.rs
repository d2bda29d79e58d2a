//! Client actor: one per accepted connection.
//!
//! Owns the socket and runs two tasks:
//! - the read loop answers pings, tracks liveness and rejects frames the
//!   server does not accept;
//! - the write loop drains the bounded outbound queue, pings idle peers and
//!   writes the close frame.
//!
//! Both loops share one [`CloseSignal`]. Whichever exits first records the
//! reason and wakes the other; the connection is unregistered once both
//! have finished.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RealtimeConfig;
use crate::domain::foundation::{ConnectionId, ProjectId, StateMachine, UserId};
use crate::domain::realtime::{BroadcastEnvelope, CloseReason, ConnectionState};

use super::hub::{ClientHandle, CloseSignal, HubHandle};
use super::messages::{encode_envelope, ClientMessage, ServerMessage};

/// Room for pong replies queued by the read loop.
const CONTROL_CAPACITY: usize = 16;

/// Per-connection timing and queue settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
    /// How long the close frame and final flush may take.
    pub close_grace: Duration,
    pub queue_capacity: usize,
}

impl ClientSettings {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            write_timeout: config.write_timeout(),
            queue_capacity: config.outbound_queue_capacity,
            ..Self::default()
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(1),
            queue_capacity: 256,
        }
    }
}

/// An authenticated, authorized connection about to go active.
pub struct ClientSession {
    connection_id: ConnectionId,
    user_id: UserId,
    project_id: ProjectId,
    hub: HubHandle,
    settings: ClientSettings,
    state: ConnectionState,
}

impl ClientSession {
    pub fn new(
        user_id: UserId,
        project_id: ProjectId,
        hub: HubHandle,
        settings: ClientSettings,
    ) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            project_id,
            hub,
            settings,
            state: ConnectionState::Authenticated,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Register with the hub and run both loops until the connection closes.
    ///
    /// Returns the reason the connection closed. The connection is
    /// unregistered before this returns.
    pub async fn run<Tx, Rx, RxErr>(mut self, mut sink: Tx, stream: Rx) -> CloseReason
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
        Rx: Stream<Item = Result<Message, RxErr>> + Unpin + Send + 'static,
        RxErr: Display + Send,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let signal = CloseSignal::new();
        let handle = ClientHandle::new(
            self.connection_id,
            self.user_id.clone(),
            self.project_id,
            outbound_tx,
            signal.clone(),
        );

        if self.hub.register(handle).await.is_err() {
            let reason = CloseReason::HubUnavailable;
            tracing::error!(
                connection_id = %self.connection_id,
                project_id = %self.project_id,
                "Hub unavailable, refusing connection"
            );
            close_socket(&mut sink, reason, self.settings.close_grace).await;
            self.advance(ConnectionState::Closed);
            return reason;
        }
        self.advance(ConnectionState::Active);

        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            project_id = %self.project_id,
            "Connection active"
        );

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (liveness_tx, liveness_rx) = watch::channel(Instant::now());

        let writer = WriteLoop {
            connection_id: self.connection_id,
            outbound: outbound_rx,
            control: control_rx,
            liveness: liveness_rx,
            signal: signal.clone(),
            settings: self.settings.clone(),
            connected: ServerMessage::connected(self.connection_id, self.project_id),
        };
        let reader = ReadLoop {
            connection_id: self.connection_id,
            control: control_tx,
            liveness: liveness_tx,
            signal: signal.clone(),
        };

        let write_task = tokio::spawn({
            let signal = signal.clone();
            async move {
                let _guard = CloseOnDrop(signal, CloseReason::WriteFailed);
                writer.run(sink).await;
            }
        });
        let read_task = tokio::spawn({
            let signal = signal.clone();
            async move {
                let _guard = CloseOnDrop(signal, CloseReason::ReadFailed);
                reader.run(stream).await;
            }
        });

        signal.closed().await;
        self.advance(ConnectionState::Draining);

        let (written, read) = tokio::join!(write_task, read_task);
        for result in [written, read] {
            if let Err(e) = result {
                tracing::error!(connection_id = %self.connection_id, "Connection task failed: {}", e);
            }
        }

        let reason = signal.reason().unwrap_or(CloseReason::ServerShutdown);

        // Stale unregisters (after eviction or shutdown) are no-ops.
        let _ = self.hub.unregister(self.connection_id).await;
        self.advance(ConnectionState::Closed);

        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            project_id = %self.project_id,
            reason = %reason,
            close_code = reason.close_code(),
            "Connection closed"
        );

        reason
    }

    fn advance(&mut self, next: ConnectionState) {
        match self.state.transition_to(next) {
            Ok(state) => self.state = state,
            Err(e) => tracing::error!(connection_id = %self.connection_id, "{}", e),
        }
    }
}

/// Fires the shared signal when a loop ends, including by panic.
struct CloseOnDrop(CloseSignal, CloseReason);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close(self.1);
    }
}

struct ReadLoop {
    connection_id: ConnectionId,
    control: mpsc::Sender<Message>,
    liveness: watch::Sender<Instant>,
    signal: CloseSignal,
}

impl ReadLoop {
    async fn run<Rx, E>(self, mut stream: Rx)
    where
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = self.signal.closed() => return,
                frame = stream.next() => frame,
            };

            match frame {
                None | Some(Ok(Message::Close(_))) => break CloseReason::ClientClosed,
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %self.connection_id, "Receive error: {}", e);
                    break CloseReason::ReadFailed;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        "Received unsupported binary message"
                    );
                    break CloseReason::UnsupportedData;
                }
                // The websocket layer queues the pong reply itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => self.mark_alive(),
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                    Ok(ClientMessage::Ping) => {
                        self.mark_alive();
                        match ServerMessage::pong().to_json() {
                            Ok(json) => self.reply(Message::Text(json)),
                            Err(e) => tracing::error!("Failed to encode pong: {}", e),
                        }
                    }
                    Ok(ClientMessage::Other(kind)) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            message_type = %kind,
                            "Ignoring client message"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            "Malformed client message: {}",
                            e
                        );
                        break CloseReason::MalformedFrame;
                    }
                },
            }
        };

        self.signal.close(reason);
    }

    fn mark_alive(&self) {
        self.liveness.send_replace(Instant::now());
    }

    fn reply(&self, frame: Message) {
        // A client flooding pings faster than we write just loses replies.
        if self.control.try_send(frame).is_err() {
            tracing::trace!(connection_id = %self.connection_id, "Dropping control reply");
        }
    }
}

struct WriteLoop {
    connection_id: ConnectionId,
    outbound: mpsc::Receiver<Arc<BroadcastEnvelope>>,
    control: mpsc::Receiver<Message>,
    liveness: watch::Receiver<Instant>,
    signal: CloseSignal,
    settings: ClientSettings,
    connected: ServerMessage,
}

enum WriteFailure {
    /// The connection closed while the write was pending.
    Interrupted,
    Failed(String),
}

impl WriteLoop {
    async fn run<Tx>(mut self, mut sink: Tx)
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let reason = self.pump(&mut sink).await;
        self.signal.close(reason);

        let reason = self.signal.reason().unwrap_or(reason);
        if reason == CloseReason::DeadPeer {
            tracing::warn!(
                connection_id = %self.connection_id,
                pong_timeout_secs = self.settings.pong_timeout.as_secs(),
                "No pong received, closing dead connection"
            );
        }
        if reason.peer_reachable() {
            close_socket(&mut sink, reason, self.settings.close_grace).await;
        } else {
            let _ = tokio::time::timeout(self.settings.close_grace, sink.close()).await;
        }
    }

    async fn pump<Tx>(&mut self, sink: &mut Tx) -> CloseReason
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        match self.connected.to_json() {
            Ok(json) => {
                if let Err(reason) = self.write(sink, Message::Text(json)).await {
                    return reason;
                }
            }
            Err(e) => tracing::error!("Failed to encode connected message: {}", e),
        }

        let period = self.settings.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.signal.closed() => {
                    return self.signal.reason().unwrap_or(CloseReason::ServerShutdown);
                }
                Some(frame) = self.control.recv() => {
                    if let Err(reason) = self.write(sink, frame).await {
                        return reason;
                    }
                }
                envelope = self.outbound.recv() => {
                    // The hub dropped our sender: evicted or shutting down.
                    let Some(envelope) = envelope else {
                        return CloseReason::ServerShutdown;
                    };
                    match encode_envelope(&envelope) {
                        Ok(json) => {
                            if let Err(reason) = self.write(sink, Message::Text(json)).await {
                                return reason;
                            }
                        }
                        Err(e) => tracing::error!(
                            connection_id = %self.connection_id,
                            envelope_type = %envelope.kind(),
                            "Failed to encode envelope: {}",
                            e
                        ),
                    }
                }
                _ = ticker.tick() => {
                    let silent_for = self.liveness.borrow().elapsed();
                    if silent_for > self.settings.pong_timeout {
                        return CloseReason::DeadPeer;
                    }
                    if let Err(reason) = self.write(sink, Message::Ping(Vec::new())).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn write<Tx>(&self, sink: &mut Tx, frame: Message) -> Result<(), CloseReason>
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.signal.closed() => Err(WriteFailure::Interrupted),
            result = tokio::time::timeout(self.settings.write_timeout, sink.send(frame)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(WriteFailure::Failed(e.to_string())),
                Err(_) => Err(WriteFailure::Failed("write deadline exceeded".to_string())),
            },
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(WriteFailure::Interrupted) => {
                Err(self.signal.reason().unwrap_or(CloseReason::ServerShutdown))
            }
            Err(WriteFailure::Failed(e)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    "Send error, closing connection: {}",
                    e
                );
                Err(CloseReason::WriteFailed)
            }
        }
    }
}

/// Best-effort close frame, bounded by `grace`.
async fn close_socket<Tx>(sink: &mut Tx, reason: CloseReason, grace: Duration)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let frame = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.description().into(),
    }));

    let closing = async {
        sink.send(frame).await?;
        sink.close().await
    };
    match tokio::time::timeout(grace, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Close frame not delivered: {}", e),
        Err(_) => tracing::debug!("Close frame timed out"),
    }
}
