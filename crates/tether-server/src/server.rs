use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tether_store::Database;

use crate::delivery::DeliveryRouter;
use crate::handlers;
use crate::registry::{self, ConnectionRegistry, HEARTBEAT_INTERVAL};
use crate::ws;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5500,
            max_send_queue: 256,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            jwt_secret: "secret".to_string(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: Arc<DeliveryRouter>,
    pub jwt_secret: String,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/users/search", get(handlers::users::search))
        .route(
            "/api/users/{id}",
            get(handlers::users::profile).put(handlers::users::update_profile),
        )
        .route("/api/users/{id}/followers", get(handlers::users::followers))
        .route("/api/users/{id}/following", get(handlers::users::following))
        .route("/api/users/{id}/blocked", get(handlers::users::blocked))
        .route("/api/users/{id}/follow", post(handlers::users::follow))
        .route("/api/users/{id}/unfollow", post(handlers::users::unfollow))
        .route("/api/users/{id}/block", post(handlers::users::block))
        .route("/api/users/{id}/unblock", post(handlers::users::unblock))
        .route("/api/users/{id}/ban", post(handlers::users::ban))
        .route("/api/users/{id}/unban", post(handlers::users::unban))
        .route(
            "/api/todos",
            get(handlers::todos::list).post(handlers::todos::create),
        )
        .route(
            "/api/todos/{id}",
            put(handlers::todos::update).delete(handlers::todos::delete),
        )
        .route(
            "/api/messages",
            get(handlers::messages::list).post(handlers::messages::send),
        )
        .route("/api/messages/read", put(handlers::messages::mark_read))
        .route(
            "/api/messages/unread/count",
            get(handlers::messages::unread_count),
        )
        .route("/api/messages/{id}", delete(handlers::messages::delete))
        .route(
            "/api/notifications",
            get(handlers::notifications::list).post(handlers::notifications::create),
        )
        .route(
            "/api/notifications/read",
            put(handlers::notifications::mark_all_read),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps the
/// background heartbeat alive.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let conn_registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let delivery = Arc::new(DeliveryRouter::new(Arc::clone(&conn_registry)));

    let heartbeat =
        registry::start_heartbeat_task(Arc::clone(&conn_registry), config.heartbeat_interval);

    let state = AppState {
        db,
        registry: conn_registry,
        delivery,
        jwt_secret: config.jwt_secret,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "tether server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _heartbeat: heartbeat,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _heartbeat: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn_id, rx) = state.registry.register();
    tracing::info!(conn_id = %conn_id, "websocket client connected");
    ws::run_connection(socket, conn_id, rx, state).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
    }))
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let conn_registry = Arc::new(ConnectionRegistry::new(32));
    AppState {
        db: Database::in_memory().unwrap(),
        registry: Arc::clone(&conn_registry),
        delivery: Arc::new(DeliveryRouter::new(conn_registry)),
        jwt_secret: "test-secret".to_string(),
    }
}
