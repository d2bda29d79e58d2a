//! Committed-write notifications and their closed resource vocabulary.
//!
//! The store emits one notification per committed row change. Payloads are
//! JSON produced by database triggers:
//!
//! ```json
//! {"table": "tasks", "action": "INSERT", "project_id": "…", "id": "…"}
//! ```
//!
//! Resource tags form a closed set. Table names are singularized except for
//! `project_members`, which keeps its plural form on the wire. Anything else
//! is rejected so a new table never silently fans out under a guessed name.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::domain::foundation::ProjectId;

/// Resource whose cached view a client must invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Project,
    Sprint,
    Task,
    ProjectMembers,
}

impl ResourceKind {
    /// Every resource kind, in wire order.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Project,
        ResourceKind::Sprint,
        ResourceKind::Task,
        ResourceKind::ProjectMembers,
    ];

    /// Resolves a table name or resource tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "project" | "projects" => Some(ResourceKind::Project),
            "sprint" | "sprints" => Some(ResourceKind::Sprint),
            "task" | "tasks" => Some(ResourceKind::Task),
            "project_members" => Some(ResourceKind::ProjectMembers),
            _ => None,
        }
    }

    /// The tag clients see in `resource`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Sprint => "sprint",
            ResourceKind::Task => "task",
            ResourceKind::ProjectMembers => "project_members",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row change that was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    /// Parses a trigger operation name (`TG_OP`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("INSERT") {
            Some(ChangeAction::Insert)
        } else if raw.eq_ignore_ascii_case("UPDATE") {
            Some(ChangeAction::Update)
        } else if raw.eq_ignore_ascii_case("DELETE") {
            Some(ChangeAction::Delete)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Insert => "INSERT",
            ChangeAction::Update => "UPDATE",
            ChangeAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a notification payload could not be turned into a change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeDecodeError {
    #[error("Malformed notification payload: {0}")]
    Malformed(String),

    #[error("Unknown resource tag '{0}'")]
    UnknownResource(String),

    #[error("Unknown change action '{0}'")]
    UnknownAction(String),

    #[error("Notification has no project_id")]
    MissingProjectId,

    #[error("Invalid project_id '{0}'")]
    InvalidProjectId(String),

    #[error("Notification has no row id")]
    MissingId,
}

/// One committed row change, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub resource: ResourceKind,
    pub action: ChangeAction,
    pub project_id: ProjectId,
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    #[serde(alias = "resource")]
    table: String,
    action: String,
    #[serde(default)]
    project_id: Option<RawId>,
    #[serde(default)]
    id: Option<RawId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

impl ChangeNotification {
    /// Decodes a raw notification payload.
    pub fn from_payload(payload: &str) -> Result<Self, ChangeDecodeError> {
        let raw: RawChange = serde_json::from_str(payload)
            .map_err(|e| ChangeDecodeError::Malformed(e.to_string()))?;

        let resource = ResourceKind::from_tag(&raw.table)
            .ok_or_else(|| ChangeDecodeError::UnknownResource(raw.table.clone()))?;
        let action = ChangeAction::parse(&raw.action)
            .ok_or_else(|| ChangeDecodeError::UnknownAction(raw.action.clone()))?;

        let id = raw
            .id
            .map(RawId::into_string)
            .filter(|id| !id.is_empty())
            .ok_or(ChangeDecodeError::MissingId)?;

        let project_raw = match raw.project_id.map(RawId::into_string) {
            Some(p) if !p.is_empty() => p,
            // A project row is its own room.
            _ if resource == ResourceKind::Project => id.clone(),
            _ => return Err(ChangeDecodeError::MissingProjectId),
        };
        let project_id = project_raw
            .parse::<ProjectId>()
            .map_err(|_| ChangeDecodeError::InvalidProjectId(project_raw.clone()))?;

        Ok(Self {
            resource,
            action,
            project_id,
            id,
        })
    }
}
