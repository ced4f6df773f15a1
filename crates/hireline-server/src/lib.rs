pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hireline_api::middleware::{bearer_token, verify_token};
use hireline_api::routes;
use hireline_api::{AppState, AppStateInner};
use hireline_db::Database;
use hireline_gateway::connection;
use hireline_gateway::{ChatService, Hub};

use crate::config::ServerConfig;

/// Open the store and wire the shared state.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let db = Arc::new(Database::open(&config.db_path, config.db_busy_timeout)?);
    let chat = ChatService::new(db.clone(), Hub::new(), config.notify_timeout);
    Ok(Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        chat,
        history_preview: config.history_preview,
    }))
}

/// REST routes plus the `/gateway` WebSocket endpoint.
pub fn build_app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(routes::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> anyhow::Result<()> {
    info!("Hireline server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The credential is checked here, before the upgrade, so an unauthenticated
/// client never gets a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = bearer_token(&headers).or(query.token.as_deref()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user = match verify_token(&state.jwt_secret, token) {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected gateway handshake: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let chat = state.chat.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, chat, user))
}
