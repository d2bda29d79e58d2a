//! Connection lifecycle: states and close reasons.

use std::fmt;

use crate::domain::foundation::StateMachine;

/// Lifecycle of one client connection.
///
/// ```text
/// Connecting → Authenticated → Active → Draining → Closed
///      └────────────┴──────────────────────────────↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake and authorization in progress.
    Connecting,
    /// Credential and membership accepted, socket upgraded.
    Authenticated,
    /// Registered with the hub; read and write loops running.
    Active,
    /// One loop has exited; waiting for the other and for unregistration.
    Draining,
    /// Socket closed and connection unregistered.
    Closed,
}

impl StateMachine for ConnectionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Connecting, Authenticated)
                | (Connecting, Closed)
                | (Authenticated, Active)
                | (Authenticated, Closed)
                | (Active, Draining)
                | (Draining, Closed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use ConnectionState::*;
        match self {
            Connecting => vec![Authenticated, Closed],
            Authenticated => vec![Active, Closed],
            Active => vec![Draining],
            Draining => vec![Closed],
            Closed => vec![],
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a connection left the `Active` state. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or ended the stream.
    ClientClosed,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed or exceeded the write deadline.
    WriteFailed,
    /// No pong within the pong timeout.
    DeadPeer,
    /// The outbound queue was full when a broadcast arrived.
    SlowConsumer,
    /// The client sent a binary frame.
    UnsupportedData,
    /// The client sent a text frame that is not a known message.
    MalformedFrame,
    /// The hub stopped (shutdown) or dropped the connection.
    ServerShutdown,
    /// The hub could not be reached at registration time.
    HubUnavailable,
}

impl CloseReason {
    /// RFC 6455 close code sent with the close frame.
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::ClientClosed | CloseReason::ReadFailed | CloseReason::WriteFailed => 1000,
            CloseReason::DeadPeer | CloseReason::ServerShutdown => 1001,
            CloseReason::UnsupportedData => 1003,
            CloseReason::MalformedFrame => 1007,
            CloseReason::SlowConsumer => 1008,
            CloseReason::HubUnavailable => 1011,
        }
    }

    /// Short reason text sent with the close frame.
    pub fn description(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::ReadFailed => "read failed",
            CloseReason::WriteFailed => "write failed",
            CloseReason::DeadPeer => "pong timeout",
            CloseReason::SlowConsumer => "outbound queue full",
            CloseReason::UnsupportedData => "binary frames are not supported",
            CloseReason::MalformedFrame => "malformed message",
            CloseReason::ServerShutdown => "server shutting down",
            CloseReason::HubUnavailable => "hub unavailable",
        }
    }

    /// Whether a close frame can still be written to the peer.
    pub fn peer_reachable(&self) -> bool {
        !matches!(
            self,
            CloseReason::ClientClosed | CloseReason::ReadFailed | CloseReason::WriteFailed
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
