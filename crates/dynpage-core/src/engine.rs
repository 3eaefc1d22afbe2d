//! Wasmtime engine configuration and creation.
//!
//! The [`ScriptEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared across all requests
//! - Configured with pooling allocator for fast instantiation
//! - Set up with epoch interruption so script execution can be bounded

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use dynpage_common::{EngineConfig, PageError};

/// Thread-safe script engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] configured for serving scripted
/// pages. The engine is shared by the instance pool producer, the bytecode
/// compiler, and every execution; it contains no per-request state.
///
/// # Configuration
///
/// - **Pooling Allocator**: Pre-allocates memory for instance slots so
///   bootstrap and per-request instantiation stay cheap
/// - **Epoch Interruption**: Allows interrupting scripts that exceed their
///   execution deadline
/// - **Async Support**: Instantiation and calls happen on the async runtime
#[derive(Clone)]
pub struct ScriptEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl ScriptEngine {
    /// Create a new script engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    pub fn new(config: &EngineConfig) -> Result<Self, PageError> {
        let mut wasmtime_config = Config::new();

        // Executions run on the tokio runtime
        wasmtime_config.async_support(true);

        // Enable epoch-based interruption for execution deadlines
        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        // Configure pooling allocator for high-performance instantiation
        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            PageError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!("Script engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        // Each page instance holds two bootstrap instances plus the page
        // script, so slots are sized accordingly.
        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// This should be called periodically (e.g., every 1ms) to enable
    /// epoch-based interruption for long-running executions.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("max_instances", &self.config.max_instances)
            .field("instance_memory_mb", &self.config.instance_memory_mb)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = ScriptEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_creation_no_pooling() {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = ScriptEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(!engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_epoch_increment() {
        let config = EngineConfig::default();
        let engine = ScriptEngine::new(&config).unwrap();

        // Should not panic
        engine.increment_epoch();
        engine.increment_epoch();
    }
}
