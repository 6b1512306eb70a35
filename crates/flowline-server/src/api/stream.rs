//! Streaming responses.
//!
//! A streaming invocation is written as a sequence of events: one `chunk`
//! event per emitted chunk, then exactly one terminal `result` or `error`
//! event. The same events are framed either as newline-delimited JSON or as
//! server-sent events. The flow stream is owned by the response body, so a
//! client disconnect drops it and cancels the invocation.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use flowline_core::{FlowError, FlowStream};
use flowline_monitoring::FlowMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use super::errors::ErrorBody;

/// Content type of newline-delimited JSON responses
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One event of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A chunk emitted by the flow
    Chunk {
        /// Chunk payload
        data: Value,
    },
    /// Terminal event of a successful invocation
    Result {
        /// Final output
        data: Value,
    },
    /// Terminal event of a failed invocation
    Error {
        /// Error document
        error: ErrorBody,
    },
}

impl StreamEvent {
    /// Terminal event for an invocation outcome
    pub fn terminal(outcome: Result<Value, FlowError>) -> Self {
        match outcome {
            Ok(data) => StreamEvent::Result { data },
            Err(err) => StreamEvent::Error {
                error: ErrorBody::from(&err),
            },
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode stream event");
            r#"{"type":"error","error":{"status":"INTERNAL","message":"failed to encode stream event"}}"#
                .to_string()
        })
    }
}

type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Events of a running flow stream, ending with its terminal event
pub fn flow_events(flow: String, mut stream: FlowStream<Value, Value>) -> EventStream {
    Box::pin(async_stream::stream! {
        let started = Instant::now();
        let invocation_id = stream.context().invocation_id();

        while let Some(chunk) = stream.next_chunk().await {
            match chunk {
                Ok(data) => yield StreamEvent::Chunk { data },
                Err(err) => {
                    stream.context().cancel();
                    yield StreamEvent::terminal(Err(err));
                    FlowMetrics::record_stream_chunks(&flow, stream.delivered(), false);
                    return;
                }
            }
        }

        let delivered = stream.delivered();
        let outcome = stream.finish().await;
        debug!(flow = %flow, invocation_id = %invocation_id, chunks = delivered, success = outcome.is_ok(), "Stream finished");
        FlowMetrics::record_flow_execution(&flow, "stream", started.elapsed(), outcome.is_ok());
        FlowMetrics::record_stream_chunks(&flow, delivered, outcome.is_ok());
        yield StreamEvent::terminal(outcome);
    })
}

/// Frame events as newline-delimited JSON
pub fn ndjson_response(events: EventStream) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(format!("{}\n", event.to_json())));

    let mut response = Body::from_stream(frames).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Frame events as server-sent events, one `data:` line per event
pub fn sse_response(events: EventStream) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));
    Sse::new(frames).into_response()
}
