//! The broadcast envelope: the unit handed to the hub and fanned out to
//! every connection in a project room.
//!
//! Envelopes are immutable once built. The hub shares one `Arc` across all
//! recipients; each write loop serializes its own copy.

use std::fmt;

use crate::domain::foundation::{ProjectId, Timestamp, ValidationError};

use super::change::{ChangeAction, ChangeNotification, ResourceKind};

/// Wire tag for cache invalidation envelopes.
pub const CACHE_INVALIDATE: &str = "cache_invalidate";

/// Wire tag for reconnect envelopes.
pub const RECONNECT: &str = "reconnect";

/// What kind of envelope this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// A committed write; clients refetch the resource.
    CacheInvalidate,
    /// The change feed was interrupted; clients treat their view as stale.
    Reconnect,
    /// An application-originated event such as `message_created`.
    Event(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeKind::CacheInvalidate => CACHE_INVALIDATE,
            EnvelopeKind::Reconnect => RECONNECT,
            EnvelopeKind::Event(name) => name,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable broadcast unit.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEnvelope {
    kind: EnvelopeKind,
    project_id: ProjectId,
    resource: Option<ResourceKind>,
    action: Option<ChangeAction>,
    id: Option<String>,
    payload: Option<serde_json::Value>,
    reason: Option<String>,
    timestamp: Timestamp,
}

impl BroadcastEnvelope {
    /// Cache invalidation for a committed row change.
    pub fn cache_invalidate(change: &ChangeNotification) -> Self {
        Self {
            kind: EnvelopeKind::CacheInvalidate,
            project_id: change.project_id,
            resource: Some(change.resource),
            action: Some(change.action),
            id: Some(change.id.clone()),
            payload: None,
            reason: None,
            timestamp: Timestamp::now(),
        }
    }

    /// Tells a room's clients that interim changes may have been missed.
    pub fn reconnect(project_id: ProjectId, reason: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Reconnect,
            project_id,
            resource: None,
            action: None,
            id: None,
            payload: None,
            reason: Some(reason.into()),
            timestamp: Timestamp::now(),
        }
    }

    /// Application event. Names are snake_case and may not shadow the
    /// reserved `cache_invalidate` / `reconnect` tags.
    pub fn event(
        name: impl Into<String>,
        project_id: ProjectId,
        payload: serde_json::Value,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::empty_field("event_type"));
        }
        if name == CACHE_INVALIDATE || name == RECONNECT {
            return Err(ValidationError::invalid_format(
                "event_type",
                format!("'{}' is reserved", name),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
        {
            return Err(ValidationError::invalid_format(
                "event_type",
                "expected lowercase snake_case",
            ));
        }

        Ok(Self {
            kind: EnvelopeKind::Event(name),
            project_id,
            resource: None,
            action: None,
            id: None,
            payload: Some(payload),
            reason: None,
            timestamp: Timestamp::now(),
        })
    }

    /// Attaches the resource an application event refers to.
    pub fn about(mut self, resource: ResourceKind, action: ChangeAction, id: impl Into<String>) -> Self {
        self.resource = Some(resource);
        self.action = Some(action);
        self.id = Some(id.into());
        self
    }

    pub fn kind(&self) -> &EnvelopeKind {
        &self.kind
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn resource(&self) -> Option<ResourceKind> {
        self.resource
    }

    pub fn action(&self) -> Option<ChangeAction> {
        self.action
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> ProjectId {
        "550e8400-e29b-41d4-a716-446655440000".parse().unwrap()
    }

    #[test]
    fn cache_invalidate_copies_change_fields() {
        let change = ChangeNotification {
            resource: ResourceKind::Sprint,
            action: ChangeAction::Delete,
            project_id: project(),
            id: "s-9".to_string(),
        };
        let envelope = BroadcastEnvelope::cache_invalidate(&change);

        assert_eq!(envelope.kind(), &EnvelopeKind::CacheInvalidate);
        assert_eq!(envelope.resource(), Some(ResourceKind::Sprint));
        assert_eq!(envelope.action(), Some(ChangeAction::Delete));
        assert_eq!(envelope.id(), Some("s-9"));
        assert_eq!(envelope.project_id(), project());
    }

    #[test]
    fn reconnect_has_no_resource() {
        let envelope = BroadcastEnvelope::reconnect(project(), "change feed restored");

        assert_eq!(envelope.kind().as_str(), "reconnect");
        assert!(envelope.resource().is_none());
        assert_eq!(envelope.reason(), Some("change feed restored"));
    }

    #[test]
    fn event_rejects_reserved_and_malformed_names() {
        assert!(BroadcastEnvelope::event("reconnect", project(), json!({})).is_err());
        assert!(BroadcastEnvelope::event("cache_invalidate", project(), json!({})).is_err());
        assert!(BroadcastEnvelope::event("", project(), json!({})).is_err());
        assert!(BroadcastEnvelope::event("Message Created", project(), json!({})).is_err());
    }

    #[test]
    fn event_carries_payload_and_optional_resource() {
        let envelope = BroadcastEnvelope::event("message_created", project(), json!({"text": "hi"}))
            .unwrap()
            .about(ResourceKind::Task, ChangeAction::Update, "t-1");

        assert_eq!(envelope.kind().as_str(), "message_created");
        assert_eq!(envelope.payload(), Some(&json!({"text": "hi"})));
        assert_eq!(envelope.resource(), Some(ResourceKind::Task));
        assert_eq!(envelope.id(), Some("t-1"));
    }
}
