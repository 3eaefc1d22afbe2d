//! HTTP router configuration.
//!
//! The router is layered so that every request first passes through the
//! page-execution middleware; requests whose path is not a script fall
//! through to the explicitly registered routes (dynamic routes, health),
//! and finally to the static file fallback.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, get};
use axum::{Router, middleware};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::pages::page_middleware;
use crate::state::AppState;

/// Build the application router.
///
/// Routes:
/// - Any path resolving to a script under the script root - dynamic page
/// - `dynamic_routes` - registered one-shot / pooled-reuse script routes
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
/// - Fallback - static files (when configured), then 404
pub fn build_router(
    state: AppState,
    request_timeout: Duration,
    dynamic_routes: Vec<(String, MethodRouter<AppState>)>,
) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    for (path, handler) in dynamic_routes {
        router = router.route(&path, handler);
    }

    router
        .fallback(static_fallback)
        // Pages intercept ahead of the routes above
        .layer(middleware::from_fn_with_state(
            state.clone(),
            page_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 200 OK once the runtime is serving; reports pool capacity and
/// compile activity.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "jobs": state.pool().jobs(),
        "compiles": state.cache().compiler().compile_count(),
    });

    (StatusCode::OK, axum::Json(body))
}

/// Terminal handler: static files when configured, 404 otherwise.
async fn static_fallback(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    if matches!(*request.method(), Method::GET | Method::HEAD) {
        if let Some(statics) = state.statics() {
            if let Some(response) = statics.serve(request.uri().path()).await {
                return response;
            }
        }
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
