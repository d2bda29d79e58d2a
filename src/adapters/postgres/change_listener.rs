//! PostgreSQL LISTEN/NOTIFY implementation of ChangeFeed.
//!
//! Database triggers `pg_notify` one JSON payload per committed row change
//! on a single channel. Each `connect` opens a dedicated listener connection
//! from the pool's options.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::ports::{ChangeFeed, ChangeFeedError, ChangeStream};

/// Change feed over a NOTIFY channel.
pub struct PgChangeFeed {
    pool: PgPool,
    channel: String,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| ChangeFeedError::Connect(e.to_string()))?;

        listener
            .listen(&self.channel)
            .await
            .map_err(|e| ChangeFeedError::Connect(e.to_string()))?;

        tracing::debug!(channel = %self.channel, "LISTEN established");
        Ok(Box::new(PgChangeStream { listener }))
    }
}

struct PgChangeStream {
    listener: PgListener,
}

#[async_trait]
impl ChangeStream for PgChangeStream {
    async fn next_payload(&mut self) -> Result<String, ChangeFeedError> {
        // `try_recv` reports a dropped connection as `None` instead of
        // silently reconnecting, so the caller learns about missed changes.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(notification.payload().to_string()),
            Ok(None) => Err(ChangeFeedError::Disconnected(
                "listener connection closed".to_string(),
            )),
            Err(e) => Err(ChangeFeedError::Disconnected(e.to_string())),
        }
    }
}
