// handlers/mod.rs - 3-Tier Handler Architecture
//
// Public (no session required) → Protected (logged-in user) → Elevated (admin flag)
//
// The tiers only group handlers; the guards themselves are attached as route
// layers in routes.rs.
pub mod public; // Tier 1: /api/register, /api/login, /api/logout, /api/admin/login
pub mod protected; // Tier 2: /api/get_user
pub mod elevated; // Tier 3: /api/admin/*

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::Value;

use crate::error::ApiError;

/// Unwrap a JSON body, turning axum's rejection into our error envelope
pub(crate) fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match payload {
        Ok(Json(body)) if body.is_object() => Ok(body),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}
