//! HTTP request conversion for script execution.
//!
//! This module converts incoming HTTP requests into the request binding a
//! script reads through the `page.req_get` host function.

use axum::extract::Request;
use axum::http::request::Parts;
use bytes::Bytes;

use dynpage_core::ScriptRequest;

/// Maximum request body size accepted for script execution.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Split a request and read its body, bounded by [`MAX_BODY_BYTES`].
///
/// # Errors
///
/// Returns the body-read error when the body is larger than the limit or
/// the connection fails mid-read.
pub async fn read_request(request: Request) -> Result<(Parts, Bytes), axum::Error> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;
    Ok((parts, bytes))
}

/// Build the script-visible request binding from HTTP request parts.
pub fn script_request(parts: &Parts, body: Bytes) -> ScriptRequest {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    ScriptRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        headers,
        body: body.to_vec(),
    }
}
