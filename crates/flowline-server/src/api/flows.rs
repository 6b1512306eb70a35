//! Flow invocation endpoint, `POST /<flow>`.

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use flowline_core::{FlowContext, FlowEntry};
use flowline_monitoring::FlowMetrics;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, Instrument};

use super::errors::ApiError;
use super::stream::{self, NDJSON_CONTENT_TYPE};
use super::ApiSettings;

/// Header carrying the invocation id on every flow response
pub const INVOCATION_ID_HEADER: HeaderName = HeaderName::from_static("x-flowline-invocation-id");

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Route state of one flow endpoint
#[derive(Debug, Clone)]
pub struct FlowRoute {
    entry: FlowEntry,
    settings: ApiSettings,
}

impl FlowRoute {
    /// Bind a registry entry to its endpoint
    pub fn new(entry: FlowEntry, settings: ApiSettings) -> Self {
        Self { entry, settings }
    }
}

/// How the response is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One JSON document with `result` or `error`
    Sync,
    /// Newline-delimited JSON events
    Ndjson,
    /// Server-sent events
    Sse,
}

/// Pick the response mode from the `stream` query parameter and `Accept`
pub fn negotiate(query: Option<&str>, headers: &HeaderMap) -> Result<ResponseMode, ApiError> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let wants_sse = accept.contains(EVENT_STREAM_CONTENT_TYPE);
    let wants_ndjson = accept.contains(NDJSON_CONTENT_TYPE);

    let stream = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == "stream").then_some(value)
        })
        .last();

    match stream {
        Some("false") => Ok(ResponseMode::Sync),
        Some("true") if wants_sse => Ok(ResponseMode::Sse),
        Some("true") => Ok(ResponseMode::Ndjson),
        Some(other) => Err(ApiError::BadRequest(format!(
            "invalid value for 'stream': '{}', expected 'true' or 'false'",
            other
        ))),
        None if wants_sse => Ok(ResponseMode::Sse),
        None if wants_ndjson => Ok(ResponseMode::Ndjson),
        None => Ok(ResponseMode::Sync),
    }
}

/// Extract `data` from a `{"data": ...}` request body. A missing body or a
/// missing `data` member is `null`.
pub fn parse_request(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    let document: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {}", e)))?;

    match document {
        Value::Object(mut map) => Ok(map.remove("data").unwrap_or(Value::Null)),
        _ => Err(ApiError::BadRequest(
            "request body must be a JSON object of the form {\"data\": ...}".to_string(),
        )),
    }
}

/// Map a failure to read the request body onto the error document
pub fn body_rejection(rejection: BytesRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(rejection.body_text())
    } else {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Invoke the route's flow
pub async fn invoke_flow(
    State(route): State<FlowRoute>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let mut ctx = FlowContext::new();
    if let Some(timeout) = route.settings.request_timeout {
        ctx = ctx.with_timeout(timeout);
    }

    let span = info_span!(
        "invoke",
        flow = %route.entry.name(),
        invocation_id = %ctx.invocation_id(),
    );
    let mut response = match body {
        Ok(body) => {
            dispatch(&route, &ctx, query.as_deref(), &headers, &body)
                .instrument(span)
                .await
        }
        Err(rejection) => {
            debug!(flow = %route.entry.name(), error = %rejection.body_text(), "Request body rejected");
            body_rejection(rejection).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&ctx.invocation_id().to_string()) {
        response.headers_mut().insert(INVOCATION_ID_HEADER, value);
    }
    response
}

async fn dispatch(
    route: &FlowRoute,
    ctx: &FlowContext,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let mode = match negotiate(query, headers) {
        Ok(mode) => mode,
        Err(err) => return err.into_response(),
    };
    let input = match parse_request(body) {
        Ok(input) => input,
        Err(err) => return err.into_response(),
    };

    let flow = route.entry.name().to_string();
    debug!(flow = %flow, mode = ?mode, "Invoking flow");

    match mode {
        ResponseMode::Sync => {
            let started = Instant::now();
            let outcome = route.entry.run(ctx, input).await;
            FlowMetrics::record_flow_execution(&flow, "sync", started.elapsed(), outcome.is_ok());

            match outcome {
                Ok(result) => {
                    info!(flow = %flow, "Flow completed");
                    (StatusCode::OK, Json(json!({ "result": result }))).into_response()
                }
                Err(err) => {
                    info!(flow = %flow, error = %err, "Flow failed");
                    ApiError::from(err).into_response()
                }
            }
        }
        ResponseMode::Ndjson | ResponseMode::Sse => {
            // A sync flow streams no chunks, only its terminal event.
            // Invalid input is rejected before any event is written.
            let events = match route.entry.stream(ctx, input, route.settings.stream_buffer) {
                Ok(flow_stream) => stream::flow_events(flow, flow_stream),
                Err(err) => return ApiError::from(err).into_response(),
            };

            if mode == ResponseMode::Sse {
                stream::sse_response(events)
            } else {
                stream::ndjson_response(events)
            }
        }
    }
}
