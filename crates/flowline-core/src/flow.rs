use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult};
use crate::streaming::ChunkSink;
use crate::trace::RecordKind;

/// Type-erased flow body used by the registry and the HTTP adapter.
///
/// Takes the decoded-as-JSON input and, for streaming invocations, the
/// chunk sink. Synchronous flows ignore the sink.
pub type FlowRunner = Arc<
    dyn Fn(FlowContext, Value, Option<ChunkSink>) -> BoxFuture<'static, FlowResult<Value>>
        + Send
        + Sync,
>;

type SyncBody<I, O> = Arc<dyn Fn(FlowContext, I) -> BoxFuture<'static, FlowResult<O>> + Send + Sync>;

/// Handle to a registered synchronous flow.
///
/// Cheap to clone. Calling [`Flow::run`] from inside another flow's body
/// composes the two flows in one trace.
pub struct Flow<I, O> {
    name: Arc<str>,
    body: SyncBody<I, O>,
}

impl<I, O> Clone for Flow<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for Flow<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").field("name", &self.name).finish()
    }
}

impl<I, O> Flow<I, O>
where
    I: Send + 'static,
    O: Serialize + Send + 'static,
{
    pub(crate) fn new<F, Fut>(name: &str, body: F) -> Self
    where
        F: Fn(FlowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<O>> + Send + 'static,
    {
        Self {
            name: Arc::from(name),
            body: Arc::new(move |ctx: FlowContext, input: I| -> BoxFuture<'static, FlowResult<O>> {
                Box::pin(body(ctx, input))
            }),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the flow in `ctx`. Errors from the body, including those of
    /// nested flows, are returned unchanged.
    pub async fn run(&self, ctx: &FlowContext, input: I) -> FlowResult<O> {
        ctx.check_cancelled()?;
        traced(ctx, &self.name, (self.body)(ctx.clone(), input)).await
    }

    /// Run the flow in a fresh context
    pub async fn invoke(&self, input: I) -> FlowResult<O> {
        self.run(&FlowContext::new(), input).await
    }

    pub(crate) fn runner(&self) -> FlowRunner
    where
        I: DeserializeOwned,
    {
        let flow = self.clone();
        Arc::new(
            move |ctx: FlowContext,
                  input: Value,
                  _sink: Option<ChunkSink>|
                  -> BoxFuture<'static, FlowResult<Value>> {
                let flow = flow.clone();
                Box::pin(async move {
                    let input: I = decode_input(input)?;
                    let output = flow.run(&ctx, input).await?;
                    Ok(serde_json::to_value(output)?)
                })
            },
        )
    }
}

/// Run a flow body future inside a `flow` span and a trace record. The body
/// is dropped as soon as the context is cancelled.
pub(crate) async fn traced<O, Fut>(ctx: &FlowContext, name: &str, body: Fut) -> FlowResult<O>
where
    O: Serialize,
    Fut: Future<Output = FlowResult<O>>,
{
    let key = ctx.trace().open(name, RecordKind::Flow);
    let span = info_span!("flow", flow = %name, invocation_id = %ctx.invocation_id());

    let result = async {
        tokio::select! {
            biased;
            reason = ctx.cancelled() => Err(reason),
            result = body => result,
        }
    }
    .instrument(span)
    .await;
    match &result {
        Ok(output) => {
            ctx.trace()
                .succeed(&key, serde_json::to_value(output).ok(), false);
            debug!(flow = %name, "Flow completed");
        }
        Err(err) => {
            ctx.trace().fail(&key, err.to_string());
            debug!(flow = %name, error = %err, "Flow failed");
        }
    }
    result
}

/// Decode a JSON input into the flow's input type
pub(crate) fn decode_input<I: DeserializeOwned>(input: Value) -> FlowResult<I> {
    serde_json::from_value(input)
        .map_err(|e| FlowError::invalid_input(format!("cannot decode input: {}", e)))
}
