// handlers/public/auth/login.rs - POST /api/login handler

use axum::extract::{rejection::JsonRejection, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "ID")]
    pub account_id: String,
    #[serde(rename = "PW")]
    pub password: String,
}

/// POST /api/login - Check `{ID, PW}` and return a user session token.
///
/// Unknown account and wrong password get the same 401.
pub async fn login_post(
    State(state): State<AppState>,
    Extension(session): Extension<Claims>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    let request: LoginRequest =
        serde_json::from_value(body).map_err(|_| ApiError::bad_request("ID and PW are required"))?;

    let record = match state.users.authenticate(&request.account_id, &request.password).await {
        Ok(record) => record,
        Err(e) => {
            tracing::info!(account = %request.account_id, "Login failed: {}", e);
            return Err(e.into());
        }
    };

    let token = state
        .sessions
        .issue(session.with_user(Some(record.account_id.clone())))?;
    tracing::info!(account = %record.account_id, "User logged in");

    Ok(ApiResponse::success(json!({
        "message": "Logged in",
        "user": record.view(),
        "token": token,
    })))
}
