use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use hireline_types::api::{UpdateNotificationsRequest, UpdateNotificationsResponse};
use hireline_types::models::{AuthenticatedUser, Notification};

use crate::{AppState, blocking};

/// Upper bound on ids accepted by one PATCH.
const MAX_BATCH: usize = 500;

/// GET /notifications: the caller's unread mailbox, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = user.id.to_string();
    let notifications: Vec<Notification> = blocking(&state, move |db| {
        Ok(db
            .list_pending_notifications(&uid)?
            .iter()
            .map(|n| n.to_notification())
            .collect())
    })
    .await?;

    Ok(Json(notifications))
}

/// PATCH /notifications: move the caller's notifications forward to
/// `status`. Ids belonging to other users are ignored.
pub async fn update_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<UpdateNotificationsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.ids.len() > MAX_BATCH {
        return Err(StatusCode::BAD_REQUEST);
    }
    let uid = user.id.to_string();
    let ids: Vec<String> = req.ids.iter().map(|id| id.to_string()).collect();
    let status = req.status;

    let updated = blocking(&state, move |db| {
        db.update_notification_status(Some(&uid), &ids, status)
    })
    .await?;
    debug!("{} moved {} notifications to {}", user.id, updated, status.as_str());

    Ok(Json(UpdateNotificationsResponse { updated }))
}
