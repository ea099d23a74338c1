use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::handlers::{elevated, protected, public};
use crate::middleware::{require_admin, require_user, session_middleware};
use crate::state::AppState;

/// Full HTTP surface of the service
pub fn app(state: AppState) -> Router {
    let config = state.config.clone();
    let request_level = if config.api.enable_request_logging {
        Level::INFO
    } else {
        Level::DEBUG
    };

    Router::new()
        .merge(public_routes())
        .merge(user_routes())
        .merge(admin_routes())
        // Every API route sees a session, anonymous or not
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware))
        // Public, and deliberately outside the session layer
        .route("/", get(root))
        .route("/health", get(health))
        // Global middleware
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .layer(cors_layer(&config.security.cors_origins))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(request_level))
                .on_response(DefaultOnResponse::new().level(request_level)),
        )
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    use public::auth;

    Router::new()
        .route("/api/register", post(auth::register_post))
        .route("/api/login", post(auth::login_post))
        .route("/api/logout", post(auth::logout_post))
        // Presenting the key is how a session becomes admin
        .route("/api/admin/login", post(elevated::admin::login_post))
}

fn user_routes() -> Router<AppState> {
    use protected::user;

    Router::new()
        .route("/api/get_user", get(user::get_user))
        .route_layer(middleware::from_fn(require_user))
}

fn admin_routes() -> Router<AppState> {
    use elevated::admin;

    Router::new()
        .route("/api/admin/logout", post(admin::logout_post))
        .route("/api/admin/users", get(admin::users_get).post(admin::users_post))
        .route("/api/admin/users/:id", put(admin::user_put).delete(admin::user_delete))
        .route_layer(middleware::from_fn(require_admin))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant account backend with per-user workspaces",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "auth": "/api/register, /api/login, /api/logout (public)",
                "user": "/api/get_user (login required)",
                "admin_login": "/api/admin/login (public - admin key exchange)",
                "admin": "/api/admin/logout, /api/admin/users[/:id] (admin session required)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.store.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now
                    }
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::store::{DocumentStore, MemoryStore};

    fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::development();
        config.storage.users_dir = dir.path().to_path_buf();
        config.api.max_request_size_bytes = 1024;

        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        (app(AppState::new(config, store).unwrap()), dir)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_login_before_bootstrap_is_a_server_error() {
        let (app, _dir) = test_app();
        let request = Request::post("/api/admin/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"value":"guess"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["code"], "INTERNAL_SERVER_ERROR");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (app, _dir) = test_app();
        let request = Request::post("/api/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(format!(r#"{{"ID":"{}"}}"#, "a".repeat(4096))))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let (app, _dir) = test_app();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/login")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }
}
