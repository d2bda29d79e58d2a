//! Real-time hub configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Hub, connection and change-notifier tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Per-connection outbound queue capacity
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Hub command channel capacity
    #[serde(default = "default_hub_command_capacity")]
    pub hub_command_capacity: usize,

    /// Seconds between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds without a pong before the peer is considered dead
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Deadline for a single socket write
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Postgres NOTIFY channel carrying change notifications
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,

    /// First reconnect delay after the listener drops
    #[serde(default = "default_initial_backoff")]
    pub reconnect_initial_backoff_ms: u64,

    /// Reconnect delay ceiling
    #[serde(default = "default_max_backoff")]
    pub reconnect_max_backoff_ms: u64,
}

impl RealtimeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn reconnect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms)
    }

    /// Validate real-time configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.outbound_queue_capacity == 0 {
            return Err(ValidationError::MustBePositive("outbound_queue_capacity"));
        }
        if self.hub_command_capacity == 0 {
            return Err(ValidationError::MustBePositive("hub_command_capacity"));
        }
        if self.ping_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("ping_interval_secs"));
        }
        if self.write_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("write_timeout_secs"));
        }
        if self.pong_timeout_secs <= self.ping_interval_secs {
            return Err(ValidationError::PongTimeoutTooShort);
        }
        if self.reconnect_initial_backoff_ms == 0 {
            return Err(ValidationError::MustBePositive("reconnect_initial_backoff_ms"));
        }
        if self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms {
            return Err(ValidationError::InvalidBackoffRange);
        }
        if !is_sql_identifier(&self.notify_channel) {
            return Err(ValidationError::InvalidNotifyChannel);
        }
        Ok(())
    }
}

// LISTEN takes an identifier, not a bind parameter.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_command_capacity: default_hub_command_capacity(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            write_timeout_secs: default_write_timeout(),
            notify_channel: default_notify_channel(),
            reconnect_initial_backoff_ms: default_initial_backoff(),
            reconnect_max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_hub_command_capacity() -> usize {
    1024
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_notify_channel() -> String {
    "realtime_changes".to_string()
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}
