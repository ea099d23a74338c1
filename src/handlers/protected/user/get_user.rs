// handlers/protected/user/get_user.rs - GET /api/get_user handler

use axum::extract::State;
use axum::Extension;
use serde_json::{json, Value};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /api/get_user - The logged-in user and their workspace profile.
///
/// The session can outlive the account (admin delete), hence the 404.
pub async fn get_user(State(state): State<AppState>, Extension(session): Extension<Claims>) -> ApiResult<Value> {
    let account_id = session
        .account_id()
        .ok_or_else(|| ApiError::unauthorized("Login required"))?;

    let record = state
        .users
        .get(account_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User not found: {}", account_id)))?;

    let profile = record.profile.clone();
    Ok(ApiResponse::success(json!({
        "user": record.view(),
        "profile": profile,
    })))
}
