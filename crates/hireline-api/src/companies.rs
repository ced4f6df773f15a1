use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use hireline_types::api::CreateCompanyRequest;
use hireline_types::models::{AuthenticatedUser, Role};

use crate::{AppState, blocking};

const MAX_NAME_LEN: usize = 200;

/// POST /companies is for employers only. The company id becomes a valid
/// `receiver_id` for chat messages, delivered to the owner.
pub async fn create_company(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateCompanyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if user.role != Role::Employer {
        return Err(StatusCode::FORBIDDEN);
    }
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let id = Uuid::new_v4();
    let (cid, owner) = (id.to_string(), user.id.to_string());
    let row = blocking(&state, move |db| db.create_company(&cid, &owner, &name)).await?;
    info!("{} created company {} ({})", user.id, row.name, id);

    Ok((StatusCode::CREATED, Json(row.to_company())))
}

pub async fn get_company(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let cid = company_id.to_string();
    let row = blocking(&state, move |db| db.get_company(&cid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(row.to_company()))
}
