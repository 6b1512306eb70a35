//! The sample flows: step chaining, composition, structured input, failures
//! and streaming.

use flowline_core::{DefinitionError, Emitter, FlowContext, FlowError, FlowRegistry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input of the `complex` flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeyValue {
    /// Label
    pub key: String,
    /// Number printed after the label
    pub value: i64,
}

/// Chunk emitted by the streaming samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Count {
    /// Zero-based index of the chunk
    pub count: i64,
}

/// Registry holding every sample flow
pub fn sample_registry() -> Result<FlowRegistry, DefinitionError> {
    let mut registry = FlowRegistry::new();

    let basic = registry.define_flow("basic", |ctx: FlowContext, subject: String| async move {
        let foo = ctx
            .run("call-llm", || async move { Ok(format!("subject: {}", subject)) })
            .await?;
        ctx.run("call-llm", || async move { Ok(format!("foo: {}", foo)) })
            .await
    })?;

    registry.define_flow("parent", move |ctx: FlowContext, _: Value| {
        let basic = basic.clone();
        async move { basic.run(&ctx, "foo".to_string()).await }
    })?;

    registry.define_flow("complex", |ctx: FlowContext, input: KeyValue| async move {
        ctx.run("call-llm", || async move {
            Ok(format!("{}: {}", input.key, input.value))
        })
        .await
    })?;

    registry.define_flow("throwy", |_ctx, message: String| async move {
        Err::<String, _>(FlowError::application(message))
    })?;

    registry.define_streaming_flow("streamy", |_ctx, count: i64, emitter: Emitter<Count>| async move {
        count_up(count, None, &emitter).await
    })?;

    registry.define_streaming_flow(
        "streamyThrowy",
        |_ctx, count: i64, emitter: Emitter<Count>| async move {
            count_up(count, Some(3), &emitter).await
        },
    )?;

    Ok(registry)
}

/// Emit `{count: i}` for `i` in `0..count`, failing with `boom!` on reaching
/// `fail_at`. Nothing is emitted, and nothing fails, without a consumer.
async fn count_up(count: i64, fail_at: Option<i64>, emitter: &Emitter<Count>) -> Result<String, FlowError> {
    let mut streamed = 0;
    if emitter.is_streaming() {
        while streamed < count {
            if Some(streamed) == fail_at {
                return Err(FlowError::application("boom!"));
            }
            emitter.emit(Count { count: streamed }).await?;
            streamed += 1;
        }
    }
    Ok(format!("done: {}, streamed: {} times", count, streamed))
}
