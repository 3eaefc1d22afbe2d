//! Configuration file structures for dynpage.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`SiteConfig`]: Script and static asset locations
//! - [`RouteEntry`]: Pre-registered dynamic route definition

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.pool]
/// jobs = 8
///
/// [runtime.cache]
/// ttl_secs = 300
/// purge_interval_secs = 30
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
///
/// [site]
/// script_root = "./site"
/// static_root = "./static"
///
/// [[routes]]
/// path = "/api/time"
/// script = "/routes/time.wat"
/// reuse = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, pool, cache).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Site layout configuration.
    #[serde(default)]
    pub site: SiteConfig,

    /// Dynamic routes to register at startup.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Site layout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Root directory resolved against script identifiers.
    #[serde(default = "defaults::script_root")]
    pub script_root: String,

    /// Root directory for static assets.
    ///
    /// When unset, static file serving is disabled.
    #[serde(default)]
    pub static_root: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            script_root: defaults::script_root(),
            static_root: None,
        }
    }
}

/// A dynamic route registered at startup.
///
/// The script file is compiled once and the resulting bytecode is bound to
/// the route; `reuse` selects the pooled-reuse strategy over one-shot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteEntry {
    /// Route path (e.g., "/api/time").
    pub path: String,

    /// Script identifier, resolved beneath the script root.
    pub script: String,

    /// Use the pooled-reuse execution strategy.
    #[serde(default)]
    pub reuse: bool,
}

/// Errors from configuration file loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path of the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn script_root() -> String {
        "./site".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = ConfigFile::from_toml("").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.site.script_root, "./site");
        assert!(config.site.static_root.is_none());
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [runtime.pool]
            jobs = 4

            [server]
            bind_addr = "127.0.0.1:3000"
            request_timeout_secs = 10

            [site]
            script_root = "./pages"
            static_root = "./public"

            [[routes]]
            path = "/api/ping"
            script = "/routes/ping.wat"
            reuse = true

            [[routes]]
            path = "/api/once"
            script = "/routes/once.wat"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();
        assert_eq!(config.runtime.pool.jobs, 4);
        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.server.request_timeout_secs, 10);
        assert_eq!(config.site.static_root.as_deref(), Some("./public"));
        assert_eq!(config.routes.len(), 2);
        assert!(config.routes[0].reuse);
        assert!(!config.routes[1].reuse);
    }

    #[test]
    fn test_invalid_toml() {
        let result = ConfigFile::from_toml("not [valid");
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/nonexistent/dynpage.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
