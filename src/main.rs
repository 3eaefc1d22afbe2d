//! Dynpage CLI entry point.
//!
//! This is the main entry point for running the dynamic page HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dynpage_common::ConfigFile;
use dynpage_server::{PageServer, ServerConfig};

/// Web server for script-backed dynamic pages.
#[derive(Debug, Parser)]
#[command(name = "dynpage", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "DYNPAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, overriding the config file.
    #[arg(short, long, env = "DYNPAGE_BIND")]
    bind: Option<SocketAddr>,

    /// Script root directory, overriding the config file.
    #[arg(short, long, env = "DYNPAGE_SCRIPTS")]
    scripts: Option<PathBuf>,

    /// Preloaded instance buffer capacity, overriding the config file.
    #[arg(short, long, env = "DYNPAGE_JOBS")]
    jobs: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dynpage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting dynpage");

    // Load configuration file, then apply CLI overrides
    let mut config = match &cli.config {
        Some(path) => {
            ConfigFile::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    if let Some(scripts) = cli.scripts {
        config.site.script_root = scripts.display().to_string();
    }
    if let Some(jobs) = cli.jobs {
        config.runtime.pool.jobs = jobs;
    }

    let bind_addr: SocketAddr = match cli.bind {
        Some(addr) => addr,
        None => config
            .server
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind_addr '{}'", config.server.bind_addr))?,
    };

    let mut server_config = ServerConfig::default()
        .with_bind_addr(bind_addr)
        .with_timeout(config.server.request_timeout_secs);
    server_config.graceful_shutdown = config.server.graceful_shutdown;

    info!(
        bind_addr = %bind_addr,
        script_root = %config.site.script_root,
        jobs = config.runtime.pool.jobs,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    // Initialize the runtime (bootstrap probe included) and register routes
    let mut server = PageServer::new(&config.runtime, server_config, &config.site)
        .await
        .context("initializing page runtime")?;

    for route in &config.routes {
        server
            .register_route(&route.path, &route.script, route.reuse)
            .await
            .with_context(|| format!("registering route {}", route.path))?;
    }

    server.run().await?;

    Ok(())
}
