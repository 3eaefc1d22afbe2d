//! Common types, errors, and utilities for dynpage.
//!
//! This crate provides shared functionality used across the dynpage workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime settings
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{CacheConfig, EngineConfig, ExecutionConfig, PoolConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, RouteEntry, ServerConfigFile, SiteConfig};
pub use error::PageError;
