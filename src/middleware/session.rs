use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::AppState;

/// Decode the session token, if any, into a [`Claims`] request extension.
///
/// Requests without a token get a fresh anonymous session; a token that fails
/// verification is rejected outright rather than silently downgraded.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = match extract_bearer(request.headers())? {
        Some(token) => state.sessions.verify(token)?,
        None => Claims::anonymous(),
    };

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Guard for user routes: the session must name an account
pub async fn require_user(request: Request, next: Next) -> Result<Response, ApiError> {
    let logged_in = request
        .extensions()
        .get::<Claims>()
        .and_then(Claims::account_id)
        .is_some();

    if !logged_in {
        return Err(ApiError::unauthorized("Login required"));
    }
    Ok(next.run(request).await)
}

/// Guard for the admin console: the session must carry the admin flag
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<Claims>()
        .map_or(false, |claims| claims.admin);

    if !is_admin {
        tracing::warn!("Rejected admin request to {}", request.uri().path());
        return Err(ApiError::forbidden("Admin privileges required"));
    }
    Ok(next.run(request).await)
}

/// Extract the session token from the Authorization header
fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim())),
        Some(_) => Err(ApiError::unauthorized("Empty session token")),
        None => Err(ApiError::unauthorized("Authorization header must use Bearer token format")),
    }
}
