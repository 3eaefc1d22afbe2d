//! HTTP server for dynpage.
//!
//! This crate provides the HTTP surface for serving script-backed dynamic
//! pages. It handles:
//!
//! - Page-execution middleware (any path resolving to a script is a page)
//! - Dynamic route registration (one-shot and pooled-reuse)
//! - Static file serving with an existence cache
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use dynpage_server::{PageServer, ServerConfig};
//! use dynpage_common::{RuntimeConfig, SiteConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime_config = RuntimeConfig::default();
//!     let site = SiteConfig::default();
//!
//!     let server = PageServer::new(&runtime_config, ServerConfig::default(), &site).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod pages;
pub mod request;
pub mod response;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;
pub mod static_files;

pub use server::{PageServer, ServerConfig, TestHandle};
pub use state::AppState;
