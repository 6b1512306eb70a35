//! Health check and flow listing endpoints for the Flowline Server

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use flowline_core::FlowRegistry;
use serde_json::json;
use tracing::debug;

/// Health check handler
///
/// Reports the server version and how many flows are exposed.
pub async fn health_check(State(registry): State<Arc<FlowRegistry>>) -> impl IntoResponse {
    debug!("Health check requested");

    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "flows": registry.len(),
    }))
}

/// List the registered flows with their payload schemas
pub async fn list_flows(State(registry): State<Arc<FlowRegistry>>) -> impl IntoResponse {
    Json(json!({ "flows": registry.descriptors() }))
}
