use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};
use crate::trace::{StepRecord, Trace};

/// Cancellation signal shared by every clone of a [`FlowContext`]
#[derive(Debug, Clone)]
struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    fn cancel(&self) {
        self.sender.send_replace(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so `changed` only returns once
        // the flag flips.
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Execution context of one flow invocation.
///
/// Carries the invocation id, the execution trace, the cancellation signal
/// and an optional deadline. Clones share all of it; a nested flow receives
/// a clone of its parent's context.
#[derive(Debug, Clone)]
pub struct FlowContext {
    invocation_id: Uuid,
    trace: Trace,
    cancel: CancelSignal,
    deadline: Option<Instant>,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowContext {
    /// Fresh context with an empty trace and no deadline
    pub fn new() -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            trace: Trace::new(),
            cancel: CancelSignal::new(),
            deadline: None,
        }
    }

    /// Fresh context whose steps replay the successful outputs in `records`
    pub fn with_replay(records: &[StepRecord]) -> Self {
        Self {
            trace: Trace::with_replay(records),
            ..Self::new()
        }
    }

    /// Set a deadline relative to now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Identifier of this invocation
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// The invocation's execution trace
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Cancel the invocation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the invocation was cancelled or its deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.check_cancelled().is_err()
    }

    /// Fail with the cancellation outcome if the invocation must stop
    pub fn check_cancelled(&self) -> FlowResult<()> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(FlowError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves with the cancellation outcome once the invocation is
    /// cancelled or its deadline passes. Never resolves otherwise.
    pub async fn cancelled(&self) -> FlowError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.wait() => FlowError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => FlowError::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.wait().await;
                FlowError::Cancelled
            }
        }
    }

    /// Run a named step in this context. See [`crate::step::run`].
    pub async fn run<T, F, Fut>(&self, name: &str, body: F) -> FlowResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlowResult<T>>,
    {
        crate::step::run(self, name, body).await
    }
}
