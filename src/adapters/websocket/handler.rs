//! WebSocket upgrade handler for real-time project connections.
//!
//! Handles the HTTP → WebSocket upgrade and hands the socket to a
//! [`ClientSession`]:
//! 1. Resolve and validate the caller's credential
//! 2. Re-check project membership
//! 3. Upgrade to WebSocket
//! 4. Register with the hub and run the connection loops
//! 5. Unregister on disconnect
//!
//! Every rejection happens before the upgrade, as a plain HTTP response.

use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::authenticator::{ConnectionAuthenticator, UpgradeRejection};
use super::client::{ClientSession, ClientSettings};
use super::hub::{HubHandle, ProjectConnections};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: HubHandle,
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub settings: ClientSettings,
}

impl WebSocketState {
    pub fn new(
        hub: HubHandle,
        authenticator: Arc<ConnectionAuthenticator>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            hub,
            authenticator,
            settings,
        }
    }
}

/// Query parameters for the upgrade and status endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WsConnectParams {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    /// Deprecated credential fallback.
    pub token: Option<String>,
}

/// Handle WebSocket upgrade requests for a project room.
///
/// Route: `GET /ws?projectId=<uuid>`
pub async fn ws_handler(
    State(state): State<WebSocketState>,
    Query(params): Query<WsConnectParams>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let (user, project_id) = match state
        .authenticator
        .admit(&headers, params.token.as_deref(), params.project_id.as_deref())
        .await
    {
        Ok(admitted) => admitted,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(ws) = ws else {
        return UpgradeRejection::UpgradeRequired.into_response();
    };

    let session = ClientSession::new(user.id, project_id, state.hub.clone(), state.settings.clone());
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        session.run(sink, stream).await;
    })
}

/// One connection in a status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub user_id: String,
    pub project_id: String,
}

/// Diagnostic view of a project room.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusResponse {
    pub project_id: String,
    pub total_clients: usize,
    pub matching_clients: usize,
    pub clients: Vec<ClientStatus>,
}

impl From<ProjectConnections> for ConnectionStatusResponse {
    fn from(snapshot: ProjectConnections) -> Self {
        Self {
            project_id: snapshot.project_id.to_string(),
            total_clients: snapshot.total_clients,
            matching_clients: snapshot.matching_clients,
            clients: snapshot
                .clients
                .into_iter()
                .map(|c| ClientStatus {
                    user_id: c.user_id.to_string(),
                    project_id: c.project_id.to_string(),
                })
                .collect(),
        }
    }
}

/// Report who is connected to a project room.
///
/// Route: `GET /ws/status?projectId=<uuid>`. Same admission rules as the
/// upgrade endpoint.
pub async fn ws_status_handler(
    State(state): State<WebSocketState>,
    Query(params): Query<WsConnectParams>,
    headers: HeaderMap,
) -> Response {
    let project_id = match state
        .authenticator
        .admit(&headers, params.token.as_deref(), params.project_id.as_deref())
        .await
    {
        Ok((_, project_id)) => project_id,
        Err(rejection) => return rejection.into_response(),
    };

    match state.hub.project_connections(project_id).await {
        Ok(snapshot) => Json(ConnectionStatusResponse::from(snapshot)).into_response(),
        Err(e) => {
            tracing::error!(project_id = %project_id, "Status query failed: {}", e);
            UpgradeRejection::HubUnavailable.into_response()
        }
    }
}

/// Create axum router for the WebSocket endpoints.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .merge(websocket_router())
///     .with_state(websocket_state);
/// ```
pub fn websocket_router() -> Router<WebSocketState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/status", get(ws_status_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::MockSessionValidator;
    use crate::adapters::membership::StubAccessChecker;
    use crate::adapters::websocket::hub::{ClientHandle, CloseSignal, Hub, DEFAULT_COMMAND_CAPACITY};
    use crate::domain::foundation::{ConnectionId, ProjectId, UserId};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        hub: HubHandle,
        member_project: ProjectId,
        other_project: ProjectId,
    }

    fn fixture_with(checker: StubAccessChecker, hub: HubHandle) -> Router {
        let validator = MockSessionValidator::new()
            .with_test_user("alice-token", "alice")
            .with_expired_token("stale-token");
        let authenticator = ConnectionAuthenticator::new(
            Arc::new(validator),
            Arc::new(checker),
            Duration::from_secs(1),
        );
        websocket_router().with_state(WebSocketState::new(
            hub,
            Arc::new(authenticator),
            ClientSettings::default(),
        ))
    }

    fn fixture() -> Fixture {
        let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
        let member_project = ProjectId::new();
        let other_project = ProjectId::new();
        let checker = StubAccessChecker::new()
            .with_member(UserId::new("alice").unwrap(), member_project)
            .with_project(other_project);
        Fixture {
            app: fixture_with(checker, hub.clone()),
            hub,
            member_project,
            other_project,
        }
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn missing_credential_is_401() {
        let f = fixture();
        let (status, body) = call(
            f.app,
            get(&format!("/ws?projectId={}", f.member_project), None),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn expired_credential_is_401() {
        let f = fixture();
        let (status, body) = call(
            f.app,
            get(&format!("/ws?projectId={}", f.member_project), Some("stale-token")),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Token expired");
    }

    #[tokio::test]
    async fn missing_or_malformed_project_is_400() {
        let f = fixture();
        let (missing, _) = call(f.app.clone(), get("/ws", Some("alice-token"))).await;
        let (malformed, body) = call(f.app, get("/ws?projectId=abc", Some("alice-token"))).await;

        assert_eq!(missing, StatusCode::BAD_REQUEST);
        assert_eq!(malformed, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn non_member_is_403() {
        let f = fixture();
        let (status, body) = call(
            f.app,
            get(&format!("/ws?projectId={}", f.other_project), Some("alice-token")),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn unknown_project_is_404() {
        let f = fixture();
        let (status, body) = call(
            f.app,
            get(&format!("/ws?projectId={}", ProjectId::new()), Some("alice-token")),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "PROJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn membership_store_failure_is_503() {
        let (hub, _task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, CancellationToken::new());
        let app = fixture_with(StubAccessChecker::failing(), hub);
        let (status, _) = call(
            app,
            get(&format!("/ws?projectId={}", ProjectId::new()), Some("alice-token")),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn admitted_plain_request_is_426() {
        let f = fixture();
        let (status, body) = call(
            f.app,
            get(&format!("/ws?projectId={}", f.member_project), Some("alice-token")),
        )
        .await;

        assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
        assert_eq!(body["code"], "UPGRADE_REQUIRED");
    }

    #[tokio::test]
    async fn cookie_credential_is_accepted() {
        let f = fixture();
        let request = Request::builder()
            .uri(format!("/ws/status?projectId={}", f.member_project))
            .header(header::COOKIE, "access_token=alice-token")
            .body(Body::empty())
            .unwrap();

        let (status, _) = call(f.app, request).await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_room_members() {
        let f = fixture();
        let (tx, _rx) = mpsc::channel(4);
        f.hub
            .register(ClientHandle::new(
                ConnectionId::new(),
                UserId::new("bob").unwrap(),
                f.member_project,
                tx,
                CloseSignal::new(),
            ))
            .await
            .unwrap();

        let (status, body) = call(
            f.app,
            get(
                &format!("/ws/status?projectId={}&token=alice-token", f.member_project),
                None,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projectId"], f.member_project.to_string());
        assert_eq!(body["totalClients"], 1);
        assert_eq!(body["matchingClients"], 1);
        assert_eq!(body["clients"][0]["userId"], "bob");
        assert_eq!(body["clients"][0]["projectId"], f.member_project.to_string());
    }

    #[tokio::test]
    async fn status_requires_authentication() {
        let f = fixture();
        let (status, _) = call(
            f.app,
            get(&format!("/ws/status?projectId={}", f.member_project), None),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_with_stopped_hub_is_503() {
        let shutdown = CancellationToken::new();
        let (hub, task) = Hub::spawn(DEFAULT_COMMAND_CAPACITY, shutdown.clone());
        shutdown.cancel();
        task.await.unwrap();
        let project = ProjectId::new();
        let app = fixture_with(
            StubAccessChecker::new().with_member(UserId::new("alice").unwrap(), project),
            hub,
        );

        let (status, body) = call(
            app,
            get(&format!("/ws/status?projectId={}", project), Some("alice-token")),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "HUB_UNAVAILABLE");
    }
}
