//! Script compilation and the bytecode cache.
//!
//! This module provides:
//! - [`Bytecode`]: an opaque, serialized, re-loadable compiled script
//! - [`BytecodeCompiler`]: the dedicated compile-only path ("dumper")
//! - [`BytecodeCache`]: `resolve(path) -> Resolution` over storage,
//!   compiler, and expiring cache
//!
//! Re-loading serialized bytecode is much cheaper than recompiling the
//! source, which is what makes caching worthwhile. A failed compile is
//! never cached, so the next request retries it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use wasmtime::Module;

use crate::ScriptEngine;
use crate::cache::ExpiringCache;
use crate::storage::ScriptStore;
use dynpage_common::PageError;

/// Compiled, serialized script bytecode.
///
/// The bytes are an engine-specific artifact produced by the compiler and
/// are only meaningful to the engine configuration that produced them.
/// Cloning is cheap; the payload is shared.
#[derive(Clone)]
pub struct Bytecode {
    bytes: Arc<[u8]>,
}

impl Bytecode {
    /// Get the serialized artifact bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the serialized artifact in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the artifact is empty (never the case for a
    /// successfully compiled script).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` if both values share the same underlying artifact.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl std::fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bytecode")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Dedicated script compiler.
///
/// The compiler is used solely for compilation, never for execution, so
/// execution state can never bleed into compiles or vice versa. Compile
/// calls are serialized behind a mutex; concurrent callers queue up.
pub struct BytecodeCompiler {
    engine: ScriptEngine,
    guard: Mutex<()>,
    compiles: AtomicU64,
}

impl BytecodeCompiler {
    /// Create a compiler sharing the runtime's engine.
    ///
    /// Sharing matters: serialized bytecode can only be re-loaded by the
    /// engine configuration that produced it.
    pub fn new(engine: ScriptEngine) -> Self {
        Self {
            engine,
            guard: Mutex::new(()),
            compiles: AtomicU64::new(0),
        }
    }

    /// Compile script source (text or binary form) to serialized bytecode.
    ///
    /// # Errors
    ///
    /// Returns `CompileFailed` carrying the compiler's diagnostic if the
    /// source does not compile.
    #[instrument(skip(self, source), fields(source_len = source.len()))]
    pub fn compile(&self, source: &[u8]) -> Result<Bytecode, PageError> {
        let _guard = self.guard.lock();
        self.compiles.fetch_add(1, Ordering::Relaxed);

        let start = Instant::now();

        let module = Module::new(self.engine.inner(), source)
            .map_err(|e| PageError::compile_failed(e.to_string()))?;

        let bytes = module
            .serialize()
            .map_err(|e| PageError::compile_failed(format!("serialization failed: {e}")))?;

        info!(
            bytecode_len = bytes.len(),
            duration_ms = start.elapsed().as_millis(),
            "Script compiled"
        );

        Ok(Bytecode {
            bytes: bytes.into(),
        })
    }

    /// Total number of compile calls performed.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BytecodeCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeCompiler")
            .field("compiles", &self.compile_count())
            .finish_non_exhaustive()
    }
}

/// Outcome of resolving a script identifier to bytecode.
#[derive(Debug)]
pub enum Resolution {
    /// Served from the cache without compiling.
    Hit(Bytecode),

    /// Compiled now and stored in the cache.
    Compiled(Bytecode),

    /// The source could not be read. Not an error: the identifier is not a
    /// script route and the caller should continue to the next handler.
    SourceMissing,

    /// The source was read but did not compile. A genuine error surfaced
    /// to the client as a syntax error page.
    CompileFailed {
        /// The compiler's diagnostic message.
        diagnostic: String,
    },
}

impl Resolution {
    /// Get the bytecode if resolution produced any.
    pub fn bytecode(&self) -> Option<&Bytecode> {
        match self {
            Resolution::Hit(bc) | Resolution::Compiled(bc) => Some(bc),
            _ => None,
        }
    }
}

/// Bytecode cache over storage, compiler, and expiring cache.
///
/// `resolve` is the single entry point: cache lookup, source read, compile,
/// and cache fill, with the outcome taxonomy the execution engine needs to
/// distinguish "not a script" from "broken script".
pub struct BytecodeCache {
    store: Arc<dyn ScriptStore>,
    compiler: Arc<BytecodeCompiler>,
    entries: Arc<ExpiringCache<Bytecode>>,
}

impl BytecodeCache {
    /// Create a bytecode cache.
    pub fn new(
        store: Arc<dyn ScriptStore>,
        compiler: Arc<BytecodeCompiler>,
        entries: Arc<ExpiringCache<Bytecode>>,
    ) -> Self {
        Self {
            store,
            compiler,
            entries,
        }
    }

    /// Resolve a script identifier to bytecode.
    #[instrument(skip(self))]
    pub fn resolve(&self, script: &str) -> Resolution {
        if let Some(bytecode) = self.entries.get(script) {
            debug!(script, "Bytecode cache hit");
            return Resolution::Hit(bytecode);
        }

        let source = match self.store.open(script) {
            Ok(source) => source,
            Err(e) => {
                debug!(script, error = %e, "Script source not readable");
                return Resolution::SourceMissing;
            }
        };

        match self.compiler.compile(&source) {
            Ok(bytecode) => {
                self.entries.insert(script, bytecode.clone());
                Resolution::Compiled(bytecode)
            }
            Err(e) => Resolution::CompileFailed {
                diagnostic: e.to_string(),
            },
        }
    }

    /// The compiler backing this cache.
    pub fn compiler(&self) -> &BytecodeCompiler {
        &self.compiler
    }
}

impl std::fmt::Debug for BytecodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirStore;
    use dynpage_common::{CacheConfig, EngineConfig};
    use std::time::Duration;

    fn test_engine() -> ScriptEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        ScriptEngine::new(&config).unwrap()
    }

    fn cache_over(dir: &tempfile::TempDir) -> BytecodeCache {
        let config = CacheConfig::default();
        let engine = test_engine();
        let compiler = Arc::new(BytecodeCompiler::new(engine));
        let entries = ExpiringCache::new(config.ttl(), config.purge_interval());
        BytecodeCache::new(Arc::new(DirStore::new(dir.path())), compiler, entries)
    }

    const HELLO_WAT: &str = r#"(module (func (export "_start")))"#;

    #[test]
    fn test_compile_valid_source() {
        let compiler = BytecodeCompiler::new(test_engine());
        let bytecode = compiler.compile(HELLO_WAT.as_bytes()).unwrap();

        assert!(!bytecode.is_empty());
        assert_eq!(compiler.compile_count(), 1);
    }

    #[test]
    fn test_compile_invalid_source() {
        let compiler = BytecodeCompiler::new(test_engine());
        let err = compiler.compile(b"(module (func").unwrap_err();

        let PageError::CompileFailed { diagnostic } = err else {
            panic!("expected CompileFailed, got {err:?}");
        };
        assert!(!diagnostic.is_empty());
        // The compiler stays usable after a failed compile
        assert!(compiler.compile(HELLO_WAT.as_bytes()).is_ok());
        assert_eq!(compiler.compile_count(), 2);
    }

    #[test]
    fn test_resolve_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.wat"), HELLO_WAT).unwrap();
        let cache = cache_over(&dir);

        let first = cache.resolve("/hello.wat");
        assert!(matches!(first, Resolution::Compiled(_)));
        assert_eq!(cache.compiler().compile_count(), 1);

        // Second resolve within the TTL: same artifact, no new compile
        let second = cache.resolve("/hello.wat");
        let Resolution::Hit(bytecode) = second else {
            panic!("expected Hit");
        };
        assert!(bytecode.ptr_eq(first.bytecode().unwrap()));
        assert_eq!(cache.compiler().compile_count(), 1);
    }

    #[test]
    fn test_resolve_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_over(&dir);

        assert!(matches!(
            cache.resolve("/missing.wat"),
            Resolution::SourceMissing
        ));
        assert_eq!(cache.compiler().compile_count(), 0);
    }

    #[test]
    fn test_resolve_compile_failed_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.wat"), "(module (func").unwrap();
        let cache = cache_over(&dir);

        let first = cache.resolve("/broken.wat");
        let Resolution::CompileFailed { diagnostic } = first else {
            panic!("expected CompileFailed");
        };
        assert!(!diagnostic.is_empty());

        // Failures are not cached; the next resolve re-attempts the compile
        assert!(matches!(
            cache.resolve("/broken.wat"),
            Resolution::CompileFailed { .. }
        ));
        assert_eq!(cache.compiler().compile_count(), 2);
    }

    #[test]
    fn test_resolve_expired_recompiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.wat"), HELLO_WAT).unwrap();

        let engine = test_engine();
        let compiler = Arc::new(BytecodeCompiler::new(engine));
        let entries = ExpiringCache::new(Duration::ZERO, Duration::from_secs(30));
        let cache = BytecodeCache::new(
            Arc::new(DirStore::new(dir.path())),
            compiler,
            entries,
        );

        assert!(matches!(cache.resolve("/hello.wat"), Resolution::Compiled(_)));
        assert!(matches!(cache.resolve("/hello.wat"), Resolution::Compiled(_)));
        assert_eq!(cache.compiler().compile_count(), 2);
    }
}
