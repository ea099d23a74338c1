// handlers/public/auth/logout.rs - POST /api/logout handler

use axum::extract::State;
use axum::Extension;
use serde_json::{json, Value};

use crate::auth::Claims;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// POST /api/logout - Replacement token without the user; the admin flag stays.
pub async fn logout_post(State(state): State<AppState>, Extension(session): Extension<Claims>) -> ApiResult<Value> {
    let token = state.sessions.issue(session.with_user(None))?;
    Ok(ApiResponse::success(json!({
        "message": "Logged out",
        "token": token,
    })))
}
