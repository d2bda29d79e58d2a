//! WebSocket message types for real-time project updates.
//!
//! Defines the protocol between server and connected clients:
//! - Server → Client: broadcast envelopes, connection status, pongs
//! - Client → Server: application-level pings

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ConnectionId, ProjectId, Timestamp};
use crate::domain::realtime::BroadcastEnvelope;

// ============================================
// Server → Client: broadcast envelopes
// ============================================

/// Wire form of a [`BroadcastEnvelope`].
///
/// `data` carries the full record; `project_id`, `resource` and `action`
/// are mirrored at the top level so clients can route without unpacking.
#[derive(Debug, Serialize)]
pub struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub data: WireEnvelopeData<'a>,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct WireEnvelopeData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    pub project_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

impl<'a> From<&'a BroadcastEnvelope> for WireEnvelope<'a> {
    fn from(envelope: &'a BroadcastEnvelope) -> Self {
        let resource = envelope.resource().map(|r| r.as_str());
        let action = envelope.action().map(|a| a.as_str());
        let project_id = envelope.project_id().to_string();

        Self {
            kind: envelope.kind().as_str(),
            data: WireEnvelopeData {
                resource,
                id: envelope.id(),
                action,
                project_id: project_id.clone(),
                timestamp: envelope.timestamp().to_rfc3339(),
                payload: envelope.payload(),
                reason: envelope.reason(),
            },
            project_id,
            resource,
            action,
        }
    }
}

/// Serialize an envelope into the JSON text frame sent to clients.
pub fn encode_envelope(envelope: &BroadcastEnvelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireEnvelope::from(envelope))
}

// ============================================
// Server → Client: connection messages
// ============================================

/// Messages the connection itself originates (not routed through the hub).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame after the connection becomes active.
    Connected {
        data: ConnectedData,
        project_id: String,
    },

    /// Reply to an application-level ping.
    Pong { timestamp: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedData {
    pub connection_id: String,
    pub project_id: String,
    pub timestamp: String,
}

impl ServerMessage {
    pub fn connected(connection_id: ConnectionId, project_id: ProjectId) -> Self {
        ServerMessage::Connected {
            data: ConnectedData {
                connection_id: connection_id.to_string(),
                project_id: project_id.to_string(),
                timestamp: Timestamp::now().to_rfc3339(),
            },
            project_id: project_id.to_string(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================
// Client → Server Messages
// ============================================

/// What a client text frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Application-level heartbeat; answered with a pong.
    Ping,
    /// Well-formed but not something the server acts on.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

impl ClientMessage {
    /// Parse a client text frame.
    ///
    /// Anything that is not a JSON object with a string `type` is malformed.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("client message must be a JSON object"));
        }
        let raw: RawClientMessage = serde_json::from_value(value)?;
        Ok(match raw.kind.as_str() {
            "ping" => ClientMessage::Ping,
            _ => ClientMessage::Other(raw.kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::realtime::{ChangeAction, ChangeNotification, ResourceKind};
    use serde_json::{json, Value};

    fn project() -> ProjectId {
        "7c9e6679-7425-40de-944b-e07fc1f90ae7".parse().unwrap()
    }

    fn to_value(envelope: &BroadcastEnvelope) -> Value {
        serde_json::from_str(&encode_envelope(envelope).unwrap()).unwrap()
    }

    #[test]
    fn cache_invalidate_mirrors_routing_fields() {
        let envelope = BroadcastEnvelope::cache_invalidate(&ChangeNotification {
            resource: ResourceKind::ProjectMembers,
            action: ChangeAction::Update,
            project_id: project(),
            id: "m-1".to_string(),
        });

        let value = to_value(&envelope);

        assert_eq!(value["type"], "cache_invalidate");
        assert_eq!(value["project_id"], project().to_string());
        assert_eq!(value["resource"], "project_members");
        assert_eq!(value["action"], "UPDATE");
        assert_eq!(value["data"]["resource"], "project_members");
        assert_eq!(value["data"]["id"], "m-1");
        assert_eq!(value["data"]["action"], "UPDATE");
        assert_eq!(value["data"]["project_id"], project().to_string());
        assert!(value["data"]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(value["data"].get("payload").is_none());
    }

    #[test]
    fn reconnect_omits_resource_fields() {
        let envelope = BroadcastEnvelope::reconnect(project(), "change feed restored");

        let value = to_value(&envelope);

        assert_eq!(value["type"], "reconnect");
        assert_eq!(value["data"]["reason"], "change feed restored");
        assert!(value.get("resource").is_none());
        assert!(value.get("action").is_none());
        assert!(value["data"].get("id").is_none());
    }

    #[test]
    fn event_carries_payload() {
        let envelope =
            BroadcastEnvelope::event("message_created", project(), json!({"body": "hello"})).unwrap();

        let value = to_value(&envelope);

        assert_eq!(value["type"], "message_created");
        assert_eq!(value["data"]["payload"]["body"], "hello");
    }

    #[test]
    fn connected_message_shape() {
        let connection_id = ConnectionId::new();
        let json = ServerMessage::connected(connection_id, project()).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "connected");
        assert_eq!(value["project_id"], project().to_string());
        assert_eq!(value["data"]["connection_id"], connection_id.to_string());
    }

    #[test]
    fn pong_message_shape() {
        let value: Value = serde_json::from_str(&ServerMessage::pong().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "pong");
    }

    #[test]
    fn client_ping_parses() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
    }

    #[test]
    fn unknown_client_type_is_not_malformed() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"typing","extra":1}"#).unwrap(),
            ClientMessage::Other("typing".to_string())
        );
    }

    #[test]
    fn malformed_client_frames_are_rejected() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"kind":"ping"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"type":5}"#).is_err());
        assert!(ClientMessage::parse("[]").is_err());
        assert!(ClientMessage::parse(r#"["ping"]"#).is_err());
        assert!(ClientMessage::parse(r#""ping""#).is_err());
    }
}
