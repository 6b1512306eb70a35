use std::future::Future;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult};
use crate::trace::RecordKind;

/// Run a named step inside a flow.
///
/// The body is invoked at most once, on the calling task, and raced against
/// the context's cancellation. Its output is recorded in the invocation
/// trace. A failing body is reported as [`FlowError::Step`] carrying the step
/// name; cancellation outcomes pass through unwrapped. When the context was
/// seeded with a replay trace holding an output for this step, that output
/// is returned and the body is not invoked.
pub async fn run<T, F, Fut>(ctx: &FlowContext, name: &str, body: F) -> FlowResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = FlowResult<T>>,
{
    if name.is_empty() {
        return Err(FlowError::Internal("step name must not be empty".to_string()));
    }
    ctx.check_cancelled()?;

    let trace = ctx.trace();
    let key = trace.open(name, RecordKind::Step);

    if let Some(recorded) = trace.replayed_output(&key) {
        debug!(step = %key, "Replaying recorded step output");
        return match serde_json::from_value::<T>(recorded.clone()) {
            Ok(value) => {
                trace.succeed(&key, Some(recorded), true);
                Ok(value)
            }
            Err(e) => {
                let err = FlowError::from(e);
                trace.fail(&key, err.to_string());
                Err(wrap(name, err))
            }
        };
    }

    let span = info_span!("step", step = %key, invocation_id = %ctx.invocation_id());
    let outcome = async {
        tokio::select! {
            biased;
            reason = ctx.cancelled() => Err(reason),
            result = body() => result,
        }
    }
    .instrument(span)
    .await;

    match outcome {
        Ok(value) => {
            trace.succeed(&key, serde_json::to_value(&value).ok(), false);
            debug!(step = %key, "Step succeeded");
            Ok(value)
        }
        Err(err) => {
            trace.fail(&key, err.to_string());
            warn!(step = %key, error = %err, "Step failed");
            Err(wrap(name, err))
        }
    }
}

fn wrap(name: &str, err: FlowError) -> FlowError {
    if err.is_cancellation() {
        err
    } else {
        FlowError::Step {
            step: name.to_string(),
            source: Box::new(err),
        }
    }
}
