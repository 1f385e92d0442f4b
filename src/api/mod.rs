use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::authorizer::{bearer_token, mask, Decision};
use crate::errors::AppError;
use crate::AppState;

pub mod handlers;

/// Build the full HTTP application: management routes behind the admin
/// check, plus the unauthenticated index and health routes.
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(|| async { "hello!" }))
        .route("/healthz", get(|| async { "ok" }))
        .merge(api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // A timed-out request drops its handler future, rolling back any open transaction.
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Management API. Every route requires an admin-scoped bearer token.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/users",
            get(handlers::list_users).post(handlers::add_user),
        )
        .route(
            "/users/:id",
            get(handlers::get_user).delete(handlers::delete_user),
        )
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::add_token),
        )
        .route(
            "/tokens/:id",
            get(handlers::get_token).delete(handlers::delete_token),
        )
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}

/// Middleware: pre-flight admin check, before the body is read.
/// Mutating handlers repeat the check inside their transaction.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = bearer_token(req.headers());

    match state.authorizer.authorize_admin(presented).await {
        Decision::Allowed => Ok(next.run(req).await),
        Decision::Denied => {
            tracing::warn!(
                "admin API: {} {} denied for token {}",
                req.method(),
                req.uri().path(),
                mask(presented)
            );
            Err(AppError::Denied)
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: responses may carry credentials, never let them be cached or sniffed.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.remove("server");
    resp
}
