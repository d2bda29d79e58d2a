//! Pre-upgrade admission: authenticate the caller, then re-check project
//! membership. Every failure is an HTTP rejection; no socket exists yet.
//!
//! Order matters: anonymous callers always get `401`, so the existence of a
//! project is never revealed to them.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::domain::foundation::{AuthError, AuthenticatedUser, ErrorCode, ProjectId};
use crate::ports::{ProjectAccess, ProjectAccessChecker, SessionValidator};

use super::credentials::{resolve_credential, Credential};

/// Why an upgrade request was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpgradeRejection {
    #[error("Authentication required")]
    MissingCredential,

    #[error("Invalid token")]
    InvalidCredential,

    #[error("Token expired")]
    ExpiredCredential,

    #[error("Authentication service unavailable")]
    AuthUnavailable,

    #[error("projectId query parameter is required")]
    MissingProjectId,

    #[error("projectId must be a UUID")]
    InvalidProjectId,

    #[error("Not a member of this project")]
    NotMember,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Membership check unavailable")]
    AccessCheckUnavailable,

    #[error("Realtime hub unavailable")]
    HubUnavailable,

    #[error("WebSocket upgrade required")]
    UpgradeRequired,
}

impl UpgradeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UpgradeRejection::MissingCredential
            | UpgradeRejection::InvalidCredential
            | UpgradeRejection::ExpiredCredential => StatusCode::UNAUTHORIZED,
            UpgradeRejection::MissingProjectId | UpgradeRejection::InvalidProjectId => {
                StatusCode::BAD_REQUEST
            }
            UpgradeRejection::NotMember => StatusCode::FORBIDDEN,
            UpgradeRejection::ProjectNotFound => StatusCode::NOT_FOUND,
            UpgradeRejection::AuthUnavailable
            | UpgradeRejection::AccessCheckUnavailable
            | UpgradeRejection::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            UpgradeRejection::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            UpgradeRejection::MissingCredential
            | UpgradeRejection::InvalidCredential
            | UpgradeRejection::ExpiredCredential => ErrorCode::Unauthorized,
            UpgradeRejection::MissingProjectId | UpgradeRejection::InvalidProjectId => {
                ErrorCode::ValidationFailed
            }
            UpgradeRejection::NotMember => ErrorCode::Forbidden,
            UpgradeRejection::ProjectNotFound => ErrorCode::ProjectNotFound,
            UpgradeRejection::AuthUnavailable | UpgradeRejection::AccessCheckUnavailable => {
                ErrorCode::ServiceUnavailable
            }
            UpgradeRejection::HubUnavailable => ErrorCode::HubUnavailable,
            UpgradeRejection::UpgradeRequired => ErrorCode::UpgradeRequired,
        }
    }
}

impl From<AuthError> for UpgradeRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential => UpgradeRejection::MissingCredential,
            AuthError::InvalidToken => UpgradeRejection::InvalidCredential,
            AuthError::TokenExpired => UpgradeRejection::ExpiredCredential,
            AuthError::ServiceUnavailable(_) => UpgradeRejection::AuthUnavailable,
        }
    }
}

impl IntoResponse for UpgradeRejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({
                "error": self.to_string(),
                "code": self.code().to_string(),
            })),
        )
            .into_response()
    }
}

/// Authenticates upgrade requests and authorizes them for one project.
pub struct ConnectionAuthenticator {
    validator: Arc<dyn SessionValidator>,
    access_checker: Arc<dyn ProjectAccessChecker>,
    auth_timeout: Duration,
}

impl ConnectionAuthenticator {
    pub fn new(
        validator: Arc<dyn SessionValidator>,
        access_checker: Arc<dyn ProjectAccessChecker>,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            validator,
            access_checker,
            auth_timeout,
        }
    }

    /// Full admission check for a request.
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<(AuthenticatedUser, ProjectId), UpgradeRejection> {
        let credential = resolve_credential(headers, query_token);
        let user = self.authenticate(credential).await?;
        let project_id = parse_project_id(project_id)?;
        self.authorize(&user, &project_id).await?;
        Ok((user, project_id))
    }

    /// Validate a credential within the auth deadline.
    pub async fn authenticate(
        &self,
        credential: Option<Credential>,
    ) -> Result<AuthenticatedUser, UpgradeRejection> {
        let credential = credential.ok_or(UpgradeRejection::MissingCredential)?;

        let validation = tokio::time::timeout(
            self.auth_timeout,
            self.validator.validate(&credential.token),
        )
        .await;

        match validation {
            Ok(Ok(user)) => Ok(user),
            Ok(Err(e)) => {
                if e.is_transient() {
                    tracing::error!(source = credential.source.as_str(), "{}", e);
                } else {
                    tracing::debug!(source = credential.source.as_str(), "Credential rejected: {}", e);
                }
                Err(e.into())
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.auth_timeout.as_millis() as u64,
                    "Session validation timed out"
                );
                Err(UpgradeRejection::AuthUnavailable)
            }
        }
    }

    /// Re-check that the user may join the project's room.
    pub async fn authorize(
        &self,
        user: &AuthenticatedUser,
        project_id: &ProjectId,
    ) -> Result<(), UpgradeRejection> {
        let access = self
            .access_checker
            .check_membership(&user.id, project_id)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user.id, project_id = %project_id, "Membership check failed: {}", e);
                UpgradeRejection::AccessCheckUnavailable
            })?;

        match access {
            ProjectAccess::Member => Ok(()),
            ProjectAccess::NotMember => Err(UpgradeRejection::NotMember),
            ProjectAccess::ProjectNotFound => Err(UpgradeRejection::ProjectNotFound),
        }
    }
}

fn parse_project_id(raw: Option<&str>) -> Result<ProjectId, UpgradeRejection> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(UpgradeRejection::MissingProjectId)?;
    raw.parse().map_err(|_| UpgradeRejection::InvalidProjectId)
}
