//! Project access port for membership-gated connections.
//!
//! Re-checked after authentication and before a connection joins a room.
//!
//! # Design
//!
//! The checker distinguishes "not a member" from "no such project" so the
//! upgrade endpoint can answer `403` vs `404`. That distinction is only ever
//! surfaced to authenticated callers.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ProjectId, UserId};

/// Outcome of a membership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAccess {
    /// The user owns or is a member of the project.
    Member,
    /// The project exists but the user is not part of it.
    NotMember,
    /// No project with this ID exists.
    ProjectNotFound,
}

impl ProjectAccess {
    /// Returns true if access is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, ProjectAccess::Member)
    }
}

/// Port for checking whether a user may subscribe to a project room.
#[async_trait]
pub trait ProjectAccessChecker: Send + Sync {
    /// Check the user's membership in the project.
    async fn check_membership(
        &self,
        user_id: &UserId,
        project_id: &ProjectId,
    ) -> Result<ProjectAccess, DomainError>;
}
