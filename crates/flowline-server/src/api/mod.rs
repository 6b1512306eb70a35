//! API module for the Flowline Server
//!
//! Every registered flow is exposed as `POST /<name>`. The routes are built
//! once from the registry when the router is constructed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use flowline_core::FlowRegistry;
use flowline_monitoring::FlowMetrics;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;

pub mod errors;
pub mod flows;
pub mod health;
pub mod stream;

use errors::ApiError;
use flows::FlowRoute;

/// Per-request settings shared by every flow route
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Chunk buffer between a streaming flow and the response
    pub stream_buffer: usize,
    /// Deadline applied to each invocation
    pub request_timeout: Option<Duration>,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ApiSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            stream_buffer: config.stream_buffer.max(1),
            request_timeout: config.request_timeout(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Build the router for API endpoints
pub fn build_router(registry: Arc<FlowRegistry>, settings: ApiSettings) -> Router {
    let mut router = Router::new()
        // Health check and introspection
        .route("/_health", get(health::health_check).fallback(method_not_allowed))
        .route("/_flows", get(health::list_flows).fallback(method_not_allowed));

    // One route per flow
    for entry in registry.flows() {
        let path = format!("/{}", entry.name());
        info!(flow = %entry.name(), kind = %entry.kind(), path = %path, "Exposing flow");
        router = router.route(
            &path,
            post(flows::invoke_flow)
                .fallback(method_not_allowed)
                .with_state(FlowRoute::new(entry.clone(), settings.clone())),
        );
    }

    router
        .fallback(not_found)
        .with_state(registry)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(record_request))
                .layer(DefaultBodyLimit::max(settings.max_body_bytes)),
        )
}

async fn not_found(request: Request) -> Response {
    ApiError::NotFound(format!("no flow at '{}'", request.uri().path())).into_response()
}

async fn method_not_allowed(request: Request) -> Response {
    ApiError::MethodNotAllowed(format!(
        "method {} is not allowed on '{}'",
        request.method(),
        request.uri().path()
    ))
    .into_response()
}

/// Request metrics middleware
async fn record_request(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    FlowMetrics::record_http_request(&path, &method, response.status().as_u16(), started.elapsed());
    response
}
