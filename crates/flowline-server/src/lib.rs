//!
//! Flowline Server - HTTP exposure of Flowline flows
//!
//! This module exports all the components of the Flowline Server.

#![forbid(unsafe_code)]

use std::sync::Arc;

use flowline_core::FlowRegistry;

/// API module
pub mod api;

/// Server module
pub mod server;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

// Re-export key types
pub use api::{build_router, ApiSettings};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::FlowServer;

/// Serve `registry` with `config` until Ctrl-C
pub async fn run(config: ServerConfig, registry: FlowRegistry) -> ServerResult<()> {
    FlowServer::new(config, Arc::new(registry)).run().await
}
