//! Streaming flows.
//!
//! A streaming flow body receives an [`Emitter`] and pushes chunks through
//! it while it runs. When the invocation is consumed as a stream the body
//! runs on its own task and the emitter is connected to the consumer by a
//! bounded channel, so `emit` waits until the consumer has room for the
//! chunk. In batch mode the emitter accepts and drops every chunk.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult};
use crate::flow::{decode_input, traced, FlowRunner};

/// Sending half of the chunk channel of one streaming invocation
#[derive(Debug, Clone)]
pub struct ChunkSink {
    sender: mpsc::Sender<Value>,
}

/// Chunk emitter handed to a streaming flow body.
///
/// The body owns the emitter, so no chunk can be emitted once the body has
/// returned.
pub struct Emitter<C> {
    sink: Option<ChunkSink>,
    ctx: FlowContext,
    _chunk: PhantomData<fn(C)>,
}

impl<C> std::fmt::Debug for Emitter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("streaming", &self.sink.is_some())
            .finish()
    }
}

impl<C: Serialize> Emitter<C> {
    pub(crate) fn new(ctx: FlowContext, sink: Option<ChunkSink>) -> Self {
        Self {
            sink,
            ctx,
            _chunk: PhantomData,
        }
    }

    /// Whether chunks reach a consumer. `false` in batch mode, where
    /// [`Emitter::emit`] accepts and discards every chunk.
    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    /// Emit one chunk.
    ///
    /// Waits until the consumer accepts the chunk. Fails with the
    /// cancellation outcome once the context is cancelled and with
    /// [`FlowError::StreamClosed`] when the consumer is gone; the body must
    /// return that error without emitting again.
    pub async fn emit(&self, chunk: C) -> FlowResult<()> {
        self.ctx.check_cancelled()?;
        let Some(sink) = &self.sink else {
            return Ok(());
        };

        let value = serde_json::to_value(chunk)?;
        tokio::select! {
            biased;
            reason = self.ctx.cancelled() => Err(reason),
            sent = sink.sender.send(value) => sent.map_err(|_| {
                FlowError::StreamClosed("chunk consumer disconnected".to_string())
            }),
        }
    }
}

/// Consumer side of a streaming invocation.
///
/// Yields chunks in emission order through [`FlowStream::next_chunk`], then
/// the terminal outcome through [`FlowStream::finish`]. Dropping the stream
/// before it finished cancels the invocation.
pub struct FlowStream<C, O> {
    ctx: FlowContext,
    chunks: mpsc::Receiver<Value>,
    task: Option<JoinHandle<FlowResult<O>>>,
    outcome: Option<FlowResult<O>>,
    delivered: usize,
    _chunk: PhantomData<fn() -> C>,
}

impl<C, O> std::fmt::Debug for FlowStream<C, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStream")
            .field("invocation_id", &self.ctx.invocation_id())
            .field("delivered", &self.delivered)
            .field("finished", &self.outcome.is_some())
            .finish()
    }
}

impl<C, O> FlowStream<C, O>
where
    C: DeserializeOwned,
    O: Send + 'static,
{
    /// Spawn `start` with the sending half of a fresh channel holding at
    /// most `buffer` chunks (at least one).
    pub(crate) fn spawn<F>(ctx: &FlowContext, buffer: usize, start: F) -> Self
    where
        F: FnOnce(ChunkSink) -> BoxFuture<'static, FlowResult<O>>,
    {
        let (sender, chunks) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(start(ChunkSink { sender }));

        Self {
            ctx: ctx.clone(),
            chunks,
            task: Some(task),
            outcome: None,
            delivered: 0,
            _chunk: PhantomData,
        }
    }

    /// Context of the invocation
    pub fn context(&self) -> &FlowContext {
        &self.ctx
    }

    /// Number of chunks handed out so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Next chunk in emission order, or `None` once the body has finished
    /// and every accepted chunk was delivered. Nothing is delivered after
    /// the invocation was cancelled.
    pub async fn next_chunk(&mut self) -> Option<FlowResult<C>> {
        loop {
            if self.ctx.is_cancelled() {
                self.chunks.close();
                return None;
            }

            tokio::select! {
                biased;
                chunk = self.chunks.recv() => {
                    let value = chunk?;
                    self.delivered += 1;
                    trace!(invocation_id = %self.ctx.invocation_id(), index = self.delivered - 1, "Delivering chunk");
                    return Some(serde_json::from_value(value).map_err(FlowError::from));
                }
                outcome = Self::join(&mut self.task), if self.outcome.is_none() => {
                    // Buffered chunks are still delivered; later sends fail.
                    self.outcome = Some(outcome);
                    self.chunks.close();
                }
                _ = self.ctx.cancelled() => {}
            }
        }
    }

    /// Terminal outcome of the invocation. Chunks not yet taken with
    /// [`FlowStream::next_chunk`] are read and discarded.
    pub async fn finish(mut self) -> FlowResult<O> {
        // Keep draining so a body blocked on a full channel can complete.
        while self.next_chunk().await.is_some() {}
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        Self::join(&mut self.task).await
    }

    async fn join(task: &mut Option<JoinHandle<FlowResult<O>>>) -> FlowResult<O> {
        let Some(handle) = task.as_mut() else {
            return Err(FlowError::Internal("flow stream already finished".to_string()));
        };

        let joined = handle.await;
        *task = None;
        match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(FlowError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Streaming flow task panicked");
                Err(FlowError::Internal("streaming flow task panicked".to_string()))
            }
        }
    }
}

impl<C, O> Drop for FlowStream<C, O> {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!(invocation_id = %self.ctx.invocation_id(), "Flow stream dropped before completion, cancelling");
            self.ctx.cancel();
        }
    }
}

type StreamingBody<I, O, C> =
    Arc<dyn Fn(FlowContext, I, Emitter<C>) -> BoxFuture<'static, FlowResult<O>> + Send + Sync>;

/// Handle to a registered streaming flow producing chunks of type `C`
pub struct StreamingFlow<I, O, C> {
    name: Arc<str>,
    body: StreamingBody<I, O, C>,
}

impl<I, O, C> Clone for StreamingFlow<I, O, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl<I, O, C> std::fmt::Debug for StreamingFlow<I, O, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFlow")
            .field("name", &self.name)
            .finish()
    }
}

impl<I, O, C> StreamingFlow<I, O, C>
where
    I: Send + 'static,
    O: Serialize + Send + 'static,
    C: Serialize + 'static,
{
    pub(crate) fn new<F, Fut>(name: &str, body: F) -> Self
    where
        F: Fn(FlowContext, I, Emitter<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<O>> + Send + 'static,
    {
        Self {
            name: Arc::from(name),
            body: Arc::new(
                move |ctx: FlowContext, input: I, emitter: Emitter<C>| -> BoxFuture<'static, FlowResult<O>> {
                    Box::pin(body(ctx, input, emitter))
                },
            ),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run in batch mode: chunks are discarded, only the final output or
    /// error is returned.
    pub async fn run(&self, ctx: &FlowContext, input: I) -> FlowResult<O> {
        self.invoke_with(ctx, input, None).await
    }

    /// Run and consume the chunks as they are emitted
    pub fn stream(&self, ctx: &FlowContext, input: I, buffer: usize) -> FlowStream<C, O>
    where
        C: DeserializeOwned,
    {
        let flow = self.clone();
        let task_ctx = ctx.clone();
        FlowStream::spawn(
            ctx,
            buffer,
            move |sink: ChunkSink| -> BoxFuture<'static, FlowResult<O>> {
                Box::pin(async move { flow.invoke_with(&task_ctx, input, Some(sink)).await })
            },
        )
    }

    async fn invoke_with(
        &self,
        ctx: &FlowContext,
        input: I,
        sink: Option<ChunkSink>,
    ) -> FlowResult<O> {
        ctx.check_cancelled()?;
        let emitter = Emitter::new(ctx.clone(), sink);
        traced(ctx, &self.name, (self.body)(ctx.clone(), input, emitter)).await
    }

    pub(crate) fn runner(&self) -> FlowRunner
    where
        I: DeserializeOwned,
    {
        let flow = self.clone();
        Arc::new(
            move |ctx: FlowContext,
                  input: Value,
                  sink: Option<ChunkSink>|
                  -> BoxFuture<'static, FlowResult<Value>> {
                let flow = flow.clone();
                Box::pin(async move {
                    let input: I = decode_input(input)?;
                    let output = flow.invoke_with(&ctx, input, sink).await?;
                    Ok(serde_json::to_value(output)?)
                })
            },
        )
    }
}
