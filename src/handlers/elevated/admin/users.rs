// handlers/elevated/admin/users.rs - Admin user management handlers
//
// GET    /api/admin/users[?user_name=]  list (exact name filter)
// POST   /api/admin/users               create, same rules as registration
// PUT    /api/admin/users/:id           partial update
// DELETE /api/admin/users/:id           remove the document, keep the workspace

use axum::extract::{rejection::JsonRejection, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{NewUser, UserUpdate, UserView};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub user_name: Option<String>,
}

pub async fn users_get(State(state): State<AppState>, Query(query): Query<UserListQuery>) -> ApiResult<Vec<UserView>> {
    let mut users: Vec<UserView> = state
        .users
        .list(query.user_name.as_deref())
        .await?
        .into_iter()
        .map(UserView::from)
        .collect();
    users.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    Ok(ApiResponse::success(users))
}

pub async fn users_post(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    let record = state.users.register(NewUser::from_json(&body)?).await?;

    Ok(ApiResponse::created(json!({
        "message": "User created",
        "user": record.view(),
    })))
}

pub async fn user_put(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let update = UserUpdate::from_json(json_body(payload)?)?;
    let record = state.users.update(&account_id, update).await?;

    Ok(ApiResponse::success(json!({
        "message": "User updated",
        "user": record.view(),
    })))
}

pub async fn user_delete(State(state): State<AppState>, Path(account_id): Path<String>) -> ApiResult<Value> {
    state.users.delete(&account_id).await?;

    Ok(ApiResponse::success(json!({
        "message": "User deleted",
        "ID": account_id,
    })))
}
