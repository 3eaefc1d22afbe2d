//! HTTP response conversion and error pages.
//!
//! This module turns the response a script produced through its bound
//! context into an HTTP response, and renders the two error pages a broken
//! page can surface: "Syntax Error" for a failed compile and "Runtime
//! Error" for a failed execution.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use dynpage_core::ScriptResponse;

/// The two user-visible failure classes of a dynamic page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFailure {
    /// The script source did not compile.
    Syntax,
    /// The script compiled but failed during execution.
    Runtime,
}

impl PageFailure {
    fn title(self) -> &'static str {
        match self {
            PageFailure::Syntax => "Syntax Error",
            PageFailure::Runtime => "Runtime Error",
        }
    }
}

/// Convert a script-produced response into an HTTP response.
///
/// The script's output is emitted verbatim: headers it did not set are not
/// added, and the body is not post-processed. Headers that are not valid
/// HTTP are skipped.
pub fn into_http(response: ScriptResponse) -> Response<Body> {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| plain_500())
}

/// Render a 500 error page for a failed dynamic page.
///
/// The page embeds the request path and the compiler's or engine's
/// diagnostic; both are HTML-escaped first.
pub fn error_page(failure: PageFailure, path: &str, diagnostic: &str) -> Response<Body> {
    let title = failure.title();
    let path = escape_html(path);
    let diagnostic = escape_html(diagnostic);

    let html = format!(
        "<html><head><title>{title} in {path}</title></head>\
         <body><h1>{title} in file {path}:</h1>\
         <code>{diagnostic}</code></body></html>"
    );

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_else(|_| plain_500())
}

/// Escape text for embedding into HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Last-resort plain 500 when response construction itself fails.
fn plain_500() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_http_verbatim() {
        let script_response = ScriptResponse {
            status: 201,
            headers: vec![("x-custom".into(), "yes".into())],
            body: b"created".to_vec(),
        };

        let response = into_http(script_response);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-custom").unwrap(), "yes");
        // No content-type is invented for the script
        assert!(response.headers().get("content-type").is_none());
    }

    #[test]
    fn test_into_http_invalid_header_skipped() {
        let script_response = ScriptResponse {
            status: 200,
            headers: vec![("bad\nname".into(), "v".into()), ("good".into(), "v".into())],
            body: Vec::new(),
        };

        let response = into_http(script_response);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("good").is_some());
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn test_error_page_structure() {
        let response = error_page(PageFailure::Syntax, "/broken.wat", "expected )");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn test_error_page_escapes_diagnostic() {
        let response = error_page(
            PageFailure::Runtime,
            "/<script>alert(1)</script>",
            "trap in <module>",
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b a="1">&'"#),
            "&lt;b a=&quot;1&quot;&gt;&amp;&#39;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_failure_titles() {
        assert_eq!(PageFailure::Syntax.title(), "Syntax Error");
        assert_eq!(PageFailure::Runtime.title(), "Runtime Error");
    }
}
