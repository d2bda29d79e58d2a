//! ChangeFeed port - the store's commit-notification channel.
//!
//! A feed hands out streams. A stream yields raw payloads until its
//! underlying connection is lost; after that the caller reconnects through
//! the feed. Reconnection policy lives with the caller, not the adapter.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by change feed adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeFeedError {
    /// Could not establish the listening connection.
    #[error("Change feed connect failed: {0}")]
    Connect(String),

    /// The listening connection dropped; notifications may have been missed.
    #[error("Change feed disconnected: {0}")]
    Disconnected(String),
}

/// Opens listening connections to the store.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Connect and start listening.
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError>;
}

/// One live listening connection.
#[async_trait]
pub trait ChangeStream: Send {
    /// Wait for the next notification payload.
    ///
    /// Returns `ChangeFeedError::Disconnected` once the connection is lost;
    /// the stream must not be polled again afterwards.
    async fn next_payload(&mut self) -> Result<String, ChangeFeedError>;
}
