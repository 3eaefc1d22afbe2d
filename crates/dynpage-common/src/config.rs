//! Configuration structures for dynpage.
//!
//! This module defines configuration options for the runtime components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling allocator, epochs)
//! - [`ExecutionConfig`]: Per-execution limits (timeout)
//! - [`PoolConfig`]: Instance preload pool sizing
//! - [`CacheConfig`]: Expiring cache lifetime and purge interval

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the page runtime.
/// It can be loaded from a TOML file or constructed directly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Instance preload pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Expiring cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global engine behavior, including the memory
/// allocation strategy used for instance slots.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the allocator pool.
    ///
    /// Only effective when `pooling_allocator` is enabled. Each page
    /// instance accounts for its bootstrap instances plus the page script.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable epoch-based interruption.
    ///
    /// This allows bounding script execution time. Scripts that exceed
    /// their deadline trap and are reported as runtime failures.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Script execution timeout in milliseconds.
    ///
    /// Enforced through epoch deadlines when `epoch_interruption` is
    /// enabled on the engine; ignored otherwise.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Instance preload pool configuration.
///
/// A single knob, `jobs`, controls both the preload pool capacity and the
/// reuse-ring capacity (`jobs / 2`) for pooled dynamic routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Preloaded instance buffer capacity.
    ///
    /// Must be at least 2 for pooled-reuse dynamic routes to allocate any
    /// instances (`jobs / 2` truncates toward zero).
    #[serde(default = "defaults::jobs")]
    pub jobs: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            jobs: defaults::jobs(),
        }
    }
}

impl PoolConfig {
    /// Capacity of the hand-off ring used by pooled-reuse dynamic routes.
    pub fn ring_capacity(&self) -> usize {
        self.jobs / 2
    }
}

/// Expiring cache configuration.
///
/// Shared by the bytecode cache and the static-file existence cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    #[serde(default = "defaults::ttl_secs")]
    pub ttl_secs: u64,

    /// Purge sweep interval in seconds.
    #[serde(default = "defaults::purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::ttl_secs(),
            purge_interval_secs: defaults::purge_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Get the entry lifetime as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Get the purge interval as a `Duration`.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn timeout_ms() -> u64 {
        1000
    }

    pub const fn jobs() -> usize {
        8
    }

    // 5 minute lifetime, 30 second purge sweep
    pub const fn ttl_secs() -> u64 {
        300
    }

    pub const fn purge_interval_secs() -> u64 {
        30
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert_eq!(config.engine.instance_memory_mb, 64);
        assert!(config.engine.epoch_interruption);

        assert_eq!(config.execution.timeout_ms, 1000);
        assert_eq!(config.pool.jobs, 8);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.purge_interval_secs, 30);
    }

    #[test]
    fn test_ring_capacity_truncates() {
        assert_eq!(PoolConfig { jobs: 8 }.ring_capacity(), 4);
        assert_eq!(PoolConfig { jobs: 3 }.ring_capacity(), 1);
        assert_eq!(PoolConfig { jobs: 1 }.ring_capacity(), 0);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.pool.jobs, deserialized.pool.jobs);
        assert_eq!(config.cache.ttl_secs, deserialized.cache.ttl_secs);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"pool": {"jobs": 4}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert_eq!(config.pool.jobs, 4);
        // Default values for unspecified fields
        assert!(config.engine.pooling_allocator);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_durations() {
        let cache = CacheConfig {
            ttl_secs: 60,
            purge_interval_secs: 5,
        };
        assert_eq!(cache.ttl(), Duration::from_secs(60));
        assert_eq!(cache.purge_interval(), Duration::from_secs(5));

        let exec = ExecutionConfig { timeout_ms: 250 };
        assert_eq!(exec.timeout(), Duration::from_millis(250));
    }
}
