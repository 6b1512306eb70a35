//! Main Flowline Server implementation
//!
//! This module contains the FlowServer implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use flowline_core::FlowRegistry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, ApiSettings};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// HTTP server exposing the flows of a frozen registry
#[derive(Debug, Clone)]
pub struct FlowServer {
    /// Configuration
    pub config: ServerConfig,

    /// Flows to expose
    registry: Arc<FlowRegistry>,
}

impl FlowServer {
    /// Create a new FlowServer
    pub fn new(config: ServerConfig, registry: Arc<FlowRegistry>) -> Self {
        Self { config, registry }
    }

    /// Build the API router
    pub fn router(&self) -> Router {
        api::build_router(self.registry.clone(), ApiSettings::from(&self.config))
    }

    /// Bind the configured address
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let address = (self.config.bind_address.as_str(), self.config.port);
        TcpListener::bind(address).await.map_err(|e| {
            ServerError::ConfigError(format!(
                "Cannot bind {}:{}: {}",
                self.config.bind_address, self.config.port, e
            ))
        })
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight
    /// requests
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        if self.registry.is_empty() {
            warn!("No flows registered, only the health endpoints are served");
        }
        info!(flows = self.registry.len(), "Listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting Flowline Server");
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
