//! Dynamic route registration.
//!
//! Routes bind a fixed, pre-compiled script to a path with one of two
//! execution strategies:
//!
//! - **One-shot**: every request acquires a fresh instance from the
//!   preload pool, runs the script, and disposes the instance. Maximum
//!   isolation, bootstrap cost amortized by the pool.
//! - **Pooled-reuse**: at registration, `jobs / 2` instances are taken
//!   from the pool, loaded with the script once, and cycled through a
//!   hand-off ring. Each request re-binds a fresh context and re-invokes
//!   the already-resolved entry point. Cheapest per request; suited to
//!   hot routes.
//!
//! Pooled pages return to the ring on every path, including after a
//! faulted invocation, so the ring never drains.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Response, StatusCode};
use axum::routing::{MethodRouter, any};
use tracing::{debug, error, info, warn};

use dynpage_common::PageError;
use dynpage_core::{Bytecode, LoadedPage, Outcome, ReuseRing, ScriptRequest};

use crate::pages::run_page;
use crate::request::{read_request, script_request};
use crate::response::{PageFailure, error_page, into_http};
use crate::state::AppState;

/// Build a one-shot route handler for pre-compiled bytecode.
///
/// Registered for any method; the script sees the real method through its
/// request binding.
pub fn one_shot_route(route_path: String, bytecode: Bytecode) -> MethodRouter<AppState> {
    any(move |State(state): State<AppState>, request: Request| async move {
        let Some(bound) = bind_from(request, &route_path).await else {
            return bad_request();
        };
        run_page(&state, &route_path, &bytecode, bound).await
    })
}

/// Build a pooled-reuse route handler for pre-compiled bytecode.
///
/// Pre-loads `jobs / 2` instances from the pool with the script. A `jobs`
/// setting below 2 leaves the ring empty and is rejected here rather than
/// deadlocking the first request.
///
/// # Errors
///
/// Returns `InvalidConfig` when the ring would be empty, `PoolClosed` if
/// the pool is shutting down, or `LoadFailed` if the script cannot be
/// loaded into an instance.
pub async fn pooled_route(
    state: &AppState,
    route_path: String,
    bytecode: &Bytecode,
) -> Result<MethodRouter<AppState>, PageError> {
    let slots = state.pool().jobs() / 2;
    if slots == 0 {
        return Err(PageError::invalid_config(
            "pooled routes need jobs >= 2 for a non-empty reuse ring",
        ));
    }

    let mut pages = Vec::with_capacity(slots);
    for _ in 0..slots {
        let instance = state.pool().acquire().await?;
        pages.push(LoadedPage::load(instance, bytecode).await?);
    }
    let ring = Arc::new(ReuseRing::new(pages)?);
    info!(route = %route_path, slots, "Pooled route registered");

    Ok(any(move |State(state): State<AppState>, request: Request| {
        let ring = Arc::clone(&ring);
        let route_path = route_path.clone();
        async move {
            let Some(bound) = bind_from(request, &route_path).await else {
                return bad_request();
            };
            run_pooled(&state, &ring, &route_path, bound).await
        }
    }))
}

/// Execute one request against a ring page.
///
/// The page goes back to the ring on every path after checkout.
async fn run_pooled(
    state: &AppState,
    ring: &ReuseRing,
    route_path: &str,
    bound: ScriptRequest,
) -> Response<Body> {
    let mut page = match ring.checkout().await {
        Ok(page) => page,
        Err(e) => {
            error!(route = %route_path, error = %e, "Reuse ring unavailable");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return response;
        }
    };

    let request_id = page.bind(bound);
    debug!(route = %route_path, request_id, "Invoking pooled page");

    let response = match page.invoke(state.exec_config()).await {
        Outcome::Success => into_http(page.take_response()),
        Outcome::Fault { message } => {
            warn!(route = %route_path, request_id, fault = %message, "Pooled page faulted");
            error_page(PageFailure::Runtime, route_path, &message)
        }
    };

    ring.put_back(page).await;
    response
}

/// Read the request into a script binding, `None` on a body-read failure.
async fn bind_from(request: Request, route_path: &str) -> Option<ScriptRequest> {
    match read_request(request).await {
        Ok((parts, body)) => Some(script_request(&parts, body)),
        Err(e) => {
            warn!(route = %route_path, error = %e, "Failed to read request body");
            None
        }
    }
}

fn bad_request() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}
