// handlers/elevated/admin/session.rs - Admin login/logout handlers

use axum::extract::{rejection::JsonRejection, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::auth::{secrets_match, Claims};
use crate::error::ApiError;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// POST /api/admin/login - Present the admin key as `{ "value": "..." }`.
///
/// Any user identity already in the session is kept.
pub async fn login_post(
    State(state): State<AppState>,
    Extension(session): Extension<Claims>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    let provided = body
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("value field is required"))?;

    let Some(expected) = state.admin_secret.current().await? else {
        tracing::error!("Admin login attempted before the admin key was provisioned");
        return Err(ApiError::internal_server_error("Admin key not provisioned"));
    };

    if !secrets_match(provided, &expected) {
        tracing::warn!(sid = %session.sid, "Admin login rejected");
        return Err(ApiError::unauthorized("Invalid admin key"));
    }

    let token = state.sessions.issue(session.with_admin(true))?;
    tracing::info!("Admin logged in");

    Ok(ApiResponse::success(json!({
        "message": "Admin logged in",
        "token": token,
    })))
}

/// POST /api/admin/logout
pub async fn logout_post(State(state): State<AppState>, Extension(session): Extension<Claims>) -> ApiResult<Value> {
    let token = state.sessions.issue(session.with_admin(false))?;
    Ok(ApiResponse::success(json!({
        "message": "Admin logged out",
        "token": token,
    })))
}
