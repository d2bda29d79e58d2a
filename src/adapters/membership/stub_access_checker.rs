//! In-memory implementation of ProjectAccessChecker for development and testing.
//!
//! # Usage
//!
//! ```ignore
//! use teamboard::adapters::membership::StubAccessChecker;
//!
//! let checker = StubAccessChecker::new()
//!     .with_project(other_project)
//!     .with_member(user_id, my_project);
//! ```

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ErrorCode, ProjectId, UserId};
use crate::ports::{ProjectAccess, ProjectAccessChecker};

/// Stub checker backed by fixed sets of projects and memberships.
#[derive(Debug, Clone, Default)]
pub struct StubAccessChecker {
    projects: HashSet<ProjectId>,
    members: HashSet<(UserId, ProjectId)>,
    /// Whether to simulate an unavailable store.
    fail: bool,
}

impl StubAccessChecker {
    /// Create a stub that knows no projects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stub whose every check fails (for error flows).
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Register a project with no members.
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.projects.insert(project_id);
        self
    }

    /// Register a project and make the user a member of it.
    pub fn with_member(mut self, user_id: UserId, project_id: ProjectId) -> Self {
        self.projects.insert(project_id);
        self.members.insert((user_id, project_id));
        self
    }
}

#[async_trait]
impl ProjectAccessChecker for StubAccessChecker {
    async fn check_membership(
        &self,
        user_id: &UserId,
        project_id: &ProjectId,
    ) -> Result<ProjectAccess, DomainError> {
        if self.fail {
            return Err(DomainError::new(
                ErrorCode::DatabaseError,
                "Simulated membership store failure",
            ));
        }

        if !self.projects.contains(project_id) {
            return Ok(ProjectAccess::ProjectNotFound);
        }

        if self.members.contains(&(user_id.clone(), *project_id)) {
            Ok(ProjectAccess::Member)
        } else {
            Ok(ProjectAccess::NotMember)
        }
    }
}
