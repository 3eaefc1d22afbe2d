//! Script source storage.
//!
//! This module provides the [`ScriptStore`] trait, the storage adapter that
//! resolves a script identifier (the request path) to raw source bytes, and
//! [`DirStore`], the filesystem-backed implementation used in production.
//!
//! A failed `open` is not an error at the routing layer: it means the path
//! is not a script route and the request falls through to the next handler.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Storage adapter resolving script identifiers to source bytes.
pub trait ScriptStore: Send + Sync + 'static {
    /// Open the script at `path` and read its full content.
    fn open(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Check whether `path` resolves to an existing file.
    fn exists(&self, path: &str) -> bool;
}

/// Filesystem-backed script store rooted at a directory.
///
/// Script identifiers are URL paths; they are resolved beneath the root
/// after rejecting any traversal components.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an identifier beneath the root, or `None` if it escapes it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return None;
        }

        let relative = Path::new(relative);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                // "..", absolute prefixes, etc. never resolve
                _ => return None,
            }
        }

        Some(self.root.join(relative))
    }
}

impl ScriptStore for DirStore {
    fn open(&self, path: &str) -> io::Result<Vec<u8>> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "invalid script path"))?;
        std::fs::read(resolved)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(|p| p.is_file())
    }
}
