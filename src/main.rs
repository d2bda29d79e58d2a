//! Teamboard realtime server.
//!
//! Wires configuration, PostgreSQL, the hub actor and the change notifier
//! behind the WebSocket router, and shuts everything down on Ctrl-C.

use std::sync::Arc;

use axum::Router;
use http::{HeaderValue, Method};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use teamboard::adapters::websocket::{
    websocket_router, ChangeNotifierBridge, ChangeNotifierConfig, ClientSettings,
    ConnectionAuthenticator, Hub, WebSocketState,
};
use teamboard::adapters::{JwtSessionValidator, PgChangeFeed, PostgresProjectAccessChecker};
use teamboard::config::{AppConfig, ConfigError, ServerConfig, ValidationError};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    let pool = config.database.connect().await?;
    let shutdown = CancellationToken::new();

    let (hub, hub_task) = Hub::spawn(config.realtime.hub_command_capacity, shutdown.clone());

    let feed = Arc::new(PgChangeFeed::new(
        pool.clone(),
        config.realtime.notify_channel.clone(),
    ));
    let notifier = ChangeNotifierBridge::with_config(
        feed,
        Arc::new(hub.clone()),
        ChangeNotifierConfig::from_config(&config.realtime),
    )
    .spawn(shutdown.clone());

    let authenticator = ConnectionAuthenticator::new(
        Arc::new(JwtSessionValidator::from_config(&config.auth)),
        Arc::new(PostgresProjectAccessChecker::new(pool)),
        config.auth.auth_timeout(),
    );
    let state = WebSocketState::new(
        hub,
        Arc::new(authenticator),
        ClientSettings::from_config(&config.realtime),
    );

    let app = Router::new()
        .merge(websocket_router())
        .with_state(state)
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = ?config.server.environment, "Teamboard realtime listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::warn!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    // Covers the server exiting on its own.
    shutdown.cancel();

    match notifier.await {
        Ok(exit) => tracing::info!(?exit, "Change notifier stopped"),
        Err(e) => tracing::error!(error = %e, "Change notifier task failed"),
    }
    if let Err(e) = hub_task.await {
        tracing::error!(error = %e, "Hub task failed");
    }

    tracing::info!("Teamboard realtime stopped");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&server.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if server.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_credentials(true)
}
