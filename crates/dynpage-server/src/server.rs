//! HTTP server implementation.
//!
//! This module provides the main [`PageServer`] struct for running the
//! dynamic page server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::MethodRouter;
use tokio::net::TcpListener;
use tracing::{error, info};

use dynpage_common::{PageError, RuntimeConfig, SiteConfig};
use dynpage_core::Resolution;

use crate::router::build_router;
use crate::routes::{one_shot_route, pooled_route};
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            request_timeout_secs: 30,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server config with custom bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Dynamic page HTTP server.
///
/// # Example
///
/// ```ignore
/// use dynpage_server::{PageServer, ServerConfig};
/// use dynpage_common::{RuntimeConfig, SiteConfig};
///
/// let runtime_config = RuntimeConfig::default();
/// let site = SiteConfig::default();
///
/// let mut server = PageServer::new(&runtime_config, ServerConfig::default(), &site).await?;
///
/// // Register a pooled dynamic route
/// server.register_route("/api/report", "/report.wat", true).await?;
///
/// // Run until SIGTERM/SIGINT
/// server.run().await?;
/// ```
pub struct PageServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
    /// Dynamic routes registered before startup.
    routes: Vec<(String, MethodRouter<AppState>)>,
}

impl PageServer {
    /// Create a new server instance.
    ///
    /// Initializes the whole runtime, including the pool's bootstrap
    /// probe, so a broken installation fails here rather than mid-request.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be initialized.
    pub async fn new(
        runtime_config: &RuntimeConfig,
        server_config: ServerConfig,
        site: &SiteConfig,
    ) -> Result<Self, PageError> {
        let state = AppState::init(runtime_config, site).await?;

        Ok(Self {
            state,
            config: server_config,
            routes: Vec::new(),
        })
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a dynamic route backed by a script under the script root.
    ///
    /// `reuse` selects the pooled-reuse strategy; otherwise the route is
    /// one-shot. The script is compiled now so registration-time failures
    /// surface as configuration errors, not per-request error pages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the script does not exist or the reuse
    /// ring cannot be sized, and `CompileFailed` or `LoadFailed` for a
    /// broken script.
    pub async fn register_route(
        &mut self,
        route_path: &str,
        script: &str,
        reuse: bool,
    ) -> Result<(), PageError> {
        let bytecode = match self.state.cache().resolve(script) {
            Resolution::Hit(bc) | Resolution::Compiled(bc) => bc,
            Resolution::SourceMissing => {
                return Err(PageError::invalid_config(format!(
                    "route script not found: {script}"
                )));
            }
            Resolution::CompileFailed { diagnostic } => {
                return Err(PageError::compile_failed(diagnostic));
            }
        };

        let handler = if reuse {
            pooled_route(&self.state, route_path.to_string(), &bytecode).await?
        } else {
            one_shot_route(route_path.to_string(), bytecode)
        };

        info!(route = %route_path, script, reuse, "Dynamic route registered");
        self.routes.push((route_path.to_string(), handler));
        Ok(())
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), PageError> {
        let pool = self.state.pool().jobs();
        let app = build_router(self.state, self.config.request_timeout(), self.routes);

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| PageError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, jobs = pool, "Starting HTTP server");

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| PageError::invalid_config(format!("Server error: {e}")))?;
        } else {
            axum::serve(listener, app)
                .await
                .map_err(|e| PageError::invalid_config(format!("Server error: {e}")))?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server on an ephemeral port and return a test handle.
    pub async fn start_test(self) -> Result<TestHandle, PageError> {
        let state = self.state.clone();
        let app = build_router(self.state, self.config.request_timeout(), self.routes);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| PageError::invalid_config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| PageError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            error!(error = %e, "Test server task failed");
        }
        self.state.pool().shutdown().await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
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

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_server_config_builder() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_timeout(60);

        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteConfig {
            script_root: dir.path().display().to_string(),
            static_root: None,
        };

        let server =
            PageServer::new(&test_runtime_config(), ServerConfig::default(), &site).await;
        assert!(server.is_ok());
        server.unwrap().state().pool().shutdown().await;
    }

    #[tokio::test]
    async fn test_register_route_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteConfig {
            script_root: dir.path().display().to_string(),
            static_root: None,
        };

        let mut server = PageServer::new(&test_runtime_config(), ServerConfig::default(), &site)
            .await
            .unwrap();

        let err = server
            .register_route("/api/x", "/missing.wat", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::InvalidConfig { .. }));
        server.state().pool().shutdown().await;
    }

    #[tokio::test]
    async fn test_register_route_broken_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.wat"), "(module (func").unwrap();
        let site = SiteConfig {
            script_root: dir.path().display().to_string(),
            static_root: None,
        };

        let mut server = PageServer::new(&test_runtime_config(), ServerConfig::default(), &site)
            .await
            .unwrap();

        let err = server
            .register_route("/api/x", "/broken.wat", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::CompileFailed { .. }));
        server.state().pool().shutdown().await;
    }
}
