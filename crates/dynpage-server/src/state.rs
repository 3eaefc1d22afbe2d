//! Shared application state.
//!
//! This module provides [`AppState`], which holds the runtime resources
//! every request handler needs: the engine, the instance preload pool,
//! the bytecode cache, and optionally the static file server.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use dynpage_common::{ExecutionConfig, PageError, RuntimeConfig, SiteConfig};
use dynpage_core::{
    BytecodeCache, BytecodeCompiler, DirStore, ExpiringCache, InstancePool, ScriptEngine,
};

use crate::static_files::StaticFiles;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Script engine (shared across all requests).
    engine: ScriptEngine,

    /// Instance preload pool.
    pool: Arc<InstancePool>,

    /// Bytecode cache over the script root.
    cache: Arc<BytecodeCache>,

    /// Static file server, when a static root is configured.
    statics: Option<Arc<StaticFiles>>,

    /// Execution configuration.
    exec_config: ExecutionConfig,
}

impl AppState {
    /// Initialize the runtime: engine, compiler, caches, and pool.
    ///
    /// Starts the cache purge sweep, the instance producer, and (when
    /// epoch interruption is enabled) the epoch ticker.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or the pool's
    /// bootstrap probe fails.
    pub async fn init(config: &RuntimeConfig, site: &SiteConfig) -> Result<Self, PageError> {
        let engine = ScriptEngine::new(&config.engine)?;

        let compiler = Arc::new(BytecodeCompiler::new(engine.clone()));
        let entries = ExpiringCache::new(config.cache.ttl(), config.cache.purge_interval());
        let _sweep = entries.start_purge();

        let store = Arc::new(DirStore::new(&site.script_root));
        let cache = Arc::new(BytecodeCache::new(store, compiler, entries));

        let pool =
            InstancePool::start(engine.clone(), config.execution.clone(), config.pool.jobs)
                .await?;

        if config.engine.epoch_interruption {
            spawn_epoch_ticker(engine.clone());
        }

        let statics = site
            .static_root
            .as_ref()
            .map(|root| StaticFiles::new(root, &config.cache));

        Ok(Self {
            engine,
            pool,
            cache,
            statics,
            exec_config: config.execution.clone(),
        })
    }

    /// Get the script engine.
    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Get the instance preload pool.
    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    /// Get the bytecode cache.
    pub fn cache(&self) -> &BytecodeCache {
        &self.cache
    }

    /// Get the static file server, if configured.
    pub fn statics(&self) -> Option<&Arc<StaticFiles>> {
        self.statics.as_ref()
    }

    /// Get the execution configuration.
    pub fn exec_config(&self) -> &ExecutionConfig {
        &self.exec_config
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("jobs", &self.pool.jobs())
            .field("static_root", &self.statics.is_some())
            .finish_non_exhaustive()
    }
}

/// Drive the engine's epoch forward, one tick per millisecond.
///
/// Execution deadlines are expressed in ticks, so this rate makes a
/// deadline of N ticks equal roughly N milliseconds of wall time.
fn spawn_epoch_ticker(engine: ScriptEngine) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.increment_epoch();
            trace!("Epoch tick");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynpage_common::EngineConfig;

    fn test_runtime_config() -> RuntimeConfig {
        RuntimeConfig {
            engine: EngineConfig {
                pooling_allocator: false,
                epoch_interruption: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_state_init() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteConfig {
            script_root: dir.path().display().to_string(),
            static_root: None,
        };

        let state = AppState::init(&test_runtime_config(), &site).await.unwrap();
        assert!(state.statics().is_none());
        assert!(state.pool().jobs() > 0);
        state.pool().shutdown().await;
    }

    #[tokio::test]
    async fn test_state_init_with_static_root() {
        let scripts = tempfile::tempdir().unwrap();
        let statics = tempfile::tempdir().unwrap();
        let site = SiteConfig {
            script_root: scripts.path().display().to_string(),
            static_root: Some(statics.path().display().to_string()),
        };

        let state = AppState::init(&test_runtime_config(), &site).await.unwrap();
        assert!(state.statics().is_some());
        state.pool().shutdown().await;
    }
}
