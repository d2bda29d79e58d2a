//! PostgreSQL implementation of ProjectAccessChecker.
//!
//! A user may join a project's room when they own the project or hold a row
//! in `project_members`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, ProjectId, UserId};
use crate::ports::{ProjectAccess, ProjectAccessChecker};

/// Membership re-check backed by the `projects` and `project_members` tables.
pub struct PostgresProjectAccessChecker {
    pool: PgPool,
}

impl PostgresProjectAccessChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `None` means the project row does not exist.
fn access_from_row(row: Option<(bool,)>) -> ProjectAccess {
    match row {
        None => ProjectAccess::ProjectNotFound,
        Some((true,)) => ProjectAccess::Member,
        Some((false,)) => ProjectAccess::NotMember,
    }
}

#[async_trait]
impl ProjectAccessChecker for PostgresProjectAccessChecker {
    async fn check_membership(
        &self,
        user_id: &UserId,
        project_id: &ProjectId,
    ) -> Result<ProjectAccess, DomainError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT p.owner_id::text = $2
                OR EXISTS (
                    SELECT 1
                    FROM project_members m
                    WHERE m.project_id = p.id AND m.user_id::text = $2
                ) AS is_member
            FROM projects p
            WHERE p.id = $1
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to check project membership: {}", e),
            )
        })?;

        Ok(access_from_row(row))
    }
}
