//! Page-execution middleware.
//!
//! Every request passes through here ahead of the router: the URI path is
//! resolved as a script identifier through the bytecode cache.
//!
//! - `SourceMissing` — the path is not a script; the request continues to
//!   the inner handlers (dynamic routes, static files) untouched.
//! - `CompileFailed` — a 500 "Syntax Error" page with the diagnostic.
//! - Bytecode — one instance is taken from the preload pool, bound to this
//!   request, run, and disposed. A trap or deadline produces a 500
//!   "Runtime Error" page; success emits the script's response verbatim.
//!
//! The borrowed instance is disposed exactly once on every path after
//! acquisition, off the response path.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Response, StatusCode};
use axum::middleware::Next;
use tracing::{debug, error, info, instrument, warn};

use dynpage_core::{Bytecode, InstancePool, Outcome, Resolution, ScriptRequest};

use crate::request::{read_request, script_request};
use crate::response::{PageFailure, error_page, into_http};
use crate::state::AppState;

/// Resolve and execute the request path as a dynamic page, or pass the
/// request on.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response<Body> {
    let path = request.uri().path().to_string();

    match state.cache().resolve(&path) {
        Resolution::SourceMissing => next.run(request).await,
        Resolution::CompileFailed { diagnostic } => {
            warn!(path, diagnostic, "Script failed to compile");
            error_page(PageFailure::Syntax, &path, &diagnostic)
        }
        Resolution::Hit(bytecode) | Resolution::Compiled(bytecode) => {
            let (parts, body) = match read_request(request).await {
                Ok(read) => read,
                Err(e) => {
                    warn!(path, error = %e, "Failed to read request body");
                    return status_page(StatusCode::BAD_REQUEST);
                }
            };
            let bound = script_request(&parts, body);
            run_page(&state, &path, &bytecode, bound).await
        }
    }
}

/// Execute bytecode in a fresh pool instance bound to `bound`.
///
/// Shared by the middleware and one-shot dynamic routes. The instance is
/// disposed exactly once, after the response has been decided.
pub(crate) async fn run_page(
    state: &AppState,
    path: &str,
    bytecode: &Bytecode,
    bound: ScriptRequest,
) -> Response<Body> {
    let mut instance = match state.pool().acquire().await {
        Ok(instance) => instance,
        Err(e) => {
            error!(path, error = %e, "Instance pool unavailable");
            return status_page(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let request_id = instance.bind(bound);
    debug!(path, request_id, "Executing page script");

    let response = match instance.run(bytecode, state.exec_config()).await {
        Ok(Outcome::Success) => {
            info!(path, request_id, "Page served");
            into_http(instance.take_response())
        }
        Ok(Outcome::Fault { message }) => {
            warn!(path, request_id, fault = %message, "Page script faulted");
            error_page(PageFailure::Runtime, path, &message)
        }
        Err(e) => {
            error!(path, request_id, error = %e, "Bytecode failed to load");
            error_page(PageFailure::Runtime, path, &e.to_string())
        }
    };

    InstancePool::dispose(instance);
    response
}

/// Plain status-only response for infrastructure failures.
fn status_page(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
