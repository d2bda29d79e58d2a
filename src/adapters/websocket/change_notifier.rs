//! Change notifier bridge: store commit notifications → cache invalidation.
//!
//! Listens on the [`ChangeFeed`], decodes each payload into a
//! [`ChangeNotification`] and broadcasts a `cache_invalidate` envelope to the
//! project's room.
//!
//! # Reconnection
//!
//! A lost or refused listener connection is retried forever with
//! exponential backoff. Notifications committed while disconnected are gone,
//! so after every recovery (including a failed first connect) exactly one
//! `reconnect` envelope goes to every connected client before the next
//! notification is forwarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RealtimeConfig;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::realtime::{BroadcastEnvelope, ChangeNotification};
use crate::ports::{ChangeFeed, ChangeStream, RealtimeBroadcaster};

/// Reason attached to `reconnect` envelopes after the feed recovers.
pub const FEED_RESTORED_REASON: &str = "change feed reconnected; cached data may be stale";

/// Backoff bounds for the notifier.
#[derive(Debug, Clone)]
pub struct ChangeNotifierConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ChangeNotifierConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ChangeNotifierConfig {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            initial_backoff: config.reconnect_initial_backoff(),
            max_backoff: config.reconnect_max_backoff(),
        }
    }
}

/// Doubling delay, capped, reset after a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = delay.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why the notifier stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierExit {
    Shutdown,
    /// The hub is no longer running; nothing left to notify.
    HubGone,
}

/// Bridges the change feed into the hub.
pub struct ChangeNotifierBridge {
    feed: Arc<dyn ChangeFeed>,
    broadcaster: Arc<dyn RealtimeBroadcaster>,
    config: ChangeNotifierConfig,
}

impl ChangeNotifierBridge {
    pub fn new(feed: Arc<dyn ChangeFeed>, broadcaster: Arc<dyn RealtimeBroadcaster>) -> Self {
        Self::with_config(feed, broadcaster, ChangeNotifierConfig::default())
    }

    pub fn with_config(
        feed: Arc<dyn ChangeFeed>,
        broadcaster: Arc<dyn RealtimeBroadcaster>,
        config: ChangeNotifierConfig,
    ) -> Self {
        Self {
            feed,
            broadcaster,
            config,
        }
    }

    /// Run on a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<NotifierExit> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Listen until `shutdown` fires or the hub goes away.
    pub async fn run(&self, shutdown: CancellationToken) -> NotifierExit {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut interrupted = false;

        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return NotifierExit::Shutdown,
                connected = self.feed.connect() => connected,
            };

            match connected {
                Ok(mut stream) => {
                    backoff.reset();
                    tracing::info!(recovered = interrupted, "Change notifier listening");

                    if std::mem::take(&mut interrupted) {
                        if let Err(exit) = self.announce_reconnect().await {
                            return exit;
                        }
                    }

                    match self.consume(stream.as_mut(), &shutdown).await {
                        Some(exit) => return exit,
                        None => interrupted = true,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Change notifier could not connect");
                    interrupted = true;
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "Change notifier reconnecting");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return NotifierExit::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forward payloads until the stream drops (`None`) or the notifier must stop.
    async fn consume(
        &self,
        stream: &mut dyn ChangeStream,
        shutdown: &CancellationToken,
    ) -> Option<NotifierExit> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Some(NotifierExit::Shutdown),
                next = stream.next_payload() => next,
            };

            match next {
                Ok(payload) => {
                    if let Err(exit) = self.forward(&payload).await {
                        return Some(exit);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Change notifier lost its connection");
                    return None;
                }
            }
        }
    }

    async fn forward(&self, payload: &str) -> Result<(), NotifierExit> {
        let change = match ChangeNotification::from_payload(payload) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(error = %e, payload, "Skipping change notification");
                return Ok(());
            }
        };

        tracing::debug!(
            resource = change.resource.as_str(),
            action = change.action.as_str(),
            project_id = %change.project_id,
            id = %change.id,
            "Forwarding change notification"
        );

        let envelope = BroadcastEnvelope::cache_invalidate(&change);
        match self.broadcaster.broadcast(&change.project_id, envelope).await {
            Ok(()) => Ok(()),
            Err(e) => stop_if_hub_gone(e),
        }
    }

    async fn announce_reconnect(&self) -> Result<(), NotifierExit> {
        tracing::info!("Change feed recovered, telling clients to refetch");
        match self.broadcaster.broadcast_reconnect(FEED_RESTORED_REASON).await {
            Ok(()) => Ok(()),
            Err(e) => stop_if_hub_gone(e),
        }
    }
}

/// A stopped hub ends the notifier; anything else is logged and skipped.
fn stop_if_hub_gone(err: DomainError) -> Result<(), NotifierExit> {
    if err.code() == ErrorCode::HubUnavailable {
        tracing::info!("Hub stopped, change notifier exiting");
        Err(NotifierExit::HubGone)
    } else {
        tracing::error!(error = %err, "Broadcast failed");
        Ok(())
    }
}
