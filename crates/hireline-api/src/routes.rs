use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth;
use crate::companies;
use crate::conversations;
use crate::middleware::require_auth;
use crate::notifications;
use crate::AppState;

/// All REST routes. The WebSocket gateway is mounted by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/companies", post(companies::create_company))
        .route("/companies/{company_id}", get(companies::get_company))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages),
        )
        .route(
            "/notifications",
            get(notifications::list_notifications).patch(notifications::update_notifications),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
