#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, Response};
use axum::Router;
use flowline_core::{Emitter, FlowContext, FlowError, FlowRegistry};
use flowline_server::{build_router, ApiSettings};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct Tick {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct Pair {
    pub key: String,
    pub value: String,
}

/// Flows covering each response path of the adapter
pub fn test_registry() -> FlowRegistry {
    let mut registry = FlowRegistry::new();

    let echo = registry
        .define_flow("echo", |ctx: FlowContext, input: String| async move {
            ctx.run("shout", || async move { Ok(format!("echo: {}", input)) })
                .await
        })
        .unwrap();

    registry
        .define_flow("wrap", move |ctx: FlowContext, _: Value| {
            let echo = echo.clone();
            async move { echo.run(&ctx, "inner".to_string()).await }
        })
        .unwrap();

    registry
        .define_flow("pair", |_ctx, pair: Pair| async move {
            Ok(format!("{}: {}", pair.key, pair.value))
        })
        .unwrap();

    registry
        .define_flow("fail", |ctx: FlowContext, message: String| async move {
            ctx.run::<String, _, _>("explode", || async move {
                Err(FlowError::application(message))
            })
            .await
        })
        .unwrap();

    registry
        .define_streaming_flow("ticks", |_ctx, n: usize, emitter: Emitter<Tick>| async move {
            let mut streamed = 0;
            if emitter.is_streaming() {
                for count in 0..n {
                    emitter.emit(Tick { count }).await?;
                    streamed += 1;
                }
            }
            Ok(format!("done: {}, streamed: {} times", n, streamed))
        })
        .unwrap();

    registry
        .define_streaming_flow("ticksThenFail", |_ctx, n: usize, emitter: Emitter<Tick>| async move {
            for count in 0..n {
                if count == 3 {
                    return Err(FlowError::application("boom!"));
                }
                emitter.emit(Tick { count }).await?;
            }
            Ok(format!("done: {}", n))
        })
        .unwrap();

    registry
}

pub fn test_router() -> Router {
    test_router_with(ApiSettings::default())
}

pub fn test_router_with(settings: ApiSettings) -> Router {
    build_router(Arc::new(test_registry()), settings)
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Parse newline-delimited JSON frames
pub fn ndjson_events(text: &str) -> Vec<Value> {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Parse the `data:` lines of server-sent events
pub fn sse_events(text: &str) -> Vec<Value> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}
