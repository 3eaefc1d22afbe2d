//! Static file serving with an existence cache.
//!
//! Checking whether a file exists on every request is the hot part of
//! static serving, so the result of the check is kept in a TTL'd cache.
//! A cached "absent" answer makes repeated misses cheap; the TTL bounds
//! how long a newly added file stays invisible.
//!
//! Directory listings are never served, and paths with traversal
//! components never resolve.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use tracing::{debug, warn};

use dynpage_common::CacheConfig;
use dynpage_core::ExpiringCache;

/// Static file server rooted at a directory.
pub struct StaticFiles {
    root: PathBuf,
    existence: Arc<ExpiringCache<bool>>,
}

impl StaticFiles {
    /// Create a static file server over `root`.
    ///
    /// The existence cache uses the same lifetime settings as the bytecode
    /// cache.
    pub fn new(root: impl Into<PathBuf>, cache: &CacheConfig) -> Arc<Self> {
        let existence = ExpiringCache::new(cache.ttl(), cache.purge_interval());
        let _sweep = existence.start_purge();

        Arc::new(Self {
            root: root.into(),
            existence,
        })
    }

    /// Serve the file at the request path, or `None` to fall through.
    pub async fn serve(&self, path: &str) -> Option<Response<Body>> {
        let resolved = self.resolve(path)?;

        if !self.check_exists(path, &resolved) {
            return None;
        }

        match tokio::fs::read(&resolved).await {
            Ok(bytes) => {
                debug!(path, len = bytes.len(), "Serving static file");
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type_for(&resolved))
                    .body(Body::from(bytes));
                response.ok()
            }
            Err(e) => {
                // The existence cache can be momentarily stale
                warn!(path, error = %e, "Cached static file no longer readable");
                None
            }
        }
    }

    /// Existence check through the cache.
    fn check_exists(&self, path: &str, resolved: &Path) -> bool {
        if let Some(known) = self.existence.get(path) {
            return known;
        }

        let exists = resolved.is_file();
        self.existence.insert(path, exists);
        exists
    }

    /// Resolve a URL path beneath the root, or `None` if it escapes it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return None;
        }

        let relative = Path::new(relative);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return None,
            }
        }

        Some(self.root.join(relative))
    }
}

impl std::fmt::Debug for StaticFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFiles")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Map a file extension to a content type.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
