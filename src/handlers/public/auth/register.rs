// handlers/public/auth/register.rs - POST /api/register handler

use axum::extract::{rejection::JsonRejection, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::auth::Claims;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::NewUser;
use crate::state::AppState;

/// POST /api/register - Create an account and log it in
///
/// Expected Input:
/// ```json
/// { "ID": "alice", "PW": "...", "department": "...", "email": "...",
///   "phone": "...", "user_name": "Alice" }
/// ```
///
/// Responds 201 with the stored user (no `PW`) and a session token for it.
pub async fn register_post(
    State(state): State<AppState>,
    Extension(session): Extension<Claims>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    let new_user = NewUser::from_json(&body)?;

    let record = state.users.register(new_user).await?;
    let token = state
        .sessions
        .issue(session.with_user(Some(record.account_id.clone())))?;

    Ok(ApiResponse::created(json!({
        "message": "User registered",
        "user": record.view(),
        "token": token,
    })))
}
