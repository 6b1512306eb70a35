//! Flow registry.
//!
//! Flows are defined on a mutable [`FlowRegistry`] during start-up. The
//! registry is then frozen by moving it into an `Arc` and handed to whatever
//! exposes the flows (the HTTP adapter enumerates it once, in registration
//! order).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::context::FlowContext;
use crate::error::{DefinitionError, FlowError, FlowResult};
use crate::flow::{Flow, FlowRunner};
use crate::schema::PayloadSchema;
use crate::streaming::{ChunkSink, Emitter, FlowStream, StreamingFlow};

/// Whether a flow can emit chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    /// Produces only a final output
    Sync,
    /// Emits chunks before its final output
    Streaming,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::Sync => write!(f, "sync"),
            FlowKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// Public description of a registered flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDescriptor {
    /// Flow name, also its route
    pub name: String,
    /// Sync or streaming
    pub kind: FlowKind,
    /// JSON Schema of the input
    pub input_schema: Value,
    /// JSON Schema of the final output
    pub output_schema: Value,
    /// JSON Schema of each chunk, streaming flows only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_schema: Option<Value>,
}

type InputCheck = Arc<dyn Fn(&Value) -> FlowResult<()> + Send + Sync>;

/// Type-erased registry entry operating on JSON payloads
#[derive(Clone)]
pub struct FlowEntry {
    descriptor: Arc<FlowDescriptor>,
    input_schema: Arc<PayloadSchema>,
    decode_check: InputCheck,
    runner: FlowRunner,
}

impl fmt::Debug for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowEntry")
            .field("name", &self.descriptor.name)
            .field("kind", &self.descriptor.kind)
            .finish()
    }
}

impl FlowEntry {
    /// Flow name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Sync or streaming
    pub fn kind(&self) -> FlowKind {
        self.descriptor.kind
    }

    /// Name, kind and payload schemas
    pub fn descriptor(&self) -> &FlowDescriptor {
        &self.descriptor
    }

    /// Check a JSON input against the input schema and the input type.
    /// Runs before the body so invalid input never starts an invocation.
    pub fn validate_input(&self, input: &Value) -> FlowResult<()> {
        self.input_schema.validate(input)?;
        (self.decode_check)(input)
    }

    /// Validate and run to completion. Streaming flows run in batch mode.
    pub async fn run(&self, ctx: &FlowContext, input: Value) -> FlowResult<Value> {
        self.validate_input(&input)?;
        (self.runner)(ctx.clone(), input, None).await
    }

    /// Validate and start a streaming invocation. A sync flow yields no
    /// chunks and only its final output.
    pub fn stream(
        &self,
        ctx: &FlowContext,
        input: Value,
        buffer: usize,
    ) -> FlowResult<FlowStream<Value, Value>> {
        self.validate_input(&input)?;
        let runner = self.runner.clone();
        let task_ctx = ctx.clone();
        Ok(FlowStream::spawn(
            ctx,
            buffer,
            move |sink: ChunkSink| -> BoxFuture<'static, FlowResult<Value>> {
                runner(task_ctx, input, Some(sink))
            },
        ))
    }
}

/// Registry of the flows of one application
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: IndexMap<String, FlowEntry>,
}

impl FlowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a synchronous flow and return its typed handle
    pub fn define_flow<I, O, F, Fut>(
        &mut self,
        name: &str,
        body: F,
    ) -> Result<Flow<I, O>, DefinitionError>
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + JsonSchema + Send + 'static,
        F: Fn(FlowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<O>> + Send + 'static,
    {
        self.check_name(name)?;
        let flow = Flow::new(name, body);
        let descriptor = FlowDescriptor {
            name: name.to_string(),
            kind: FlowKind::Sync,
            input_schema: crate::schema::schema_of::<I>(),
            output_schema: crate::schema::schema_of::<O>(),
            chunk_schema: None,
        };
        self.insert::<I>(descriptor, flow.runner())?;
        Ok(flow)
    }

    /// Define a streaming flow and return its typed handle
    pub fn define_streaming_flow<I, O, C, F, Fut>(
        &mut self,
        name: &str,
        body: F,
    ) -> Result<StreamingFlow<I, O, C>, DefinitionError>
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + JsonSchema + Send + 'static,
        C: Serialize + JsonSchema + 'static,
        F: Fn(FlowContext, I, Emitter<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<O>> + Send + 'static,
    {
        self.check_name(name)?;
        let flow = StreamingFlow::new(name, body);
        let descriptor = FlowDescriptor {
            name: name.to_string(),
            kind: FlowKind::Streaming,
            input_schema: crate::schema::schema_of::<I>(),
            output_schema: crate::schema::schema_of::<O>(),
            chunk_schema: Some(crate::schema::schema_of::<C>()),
        };
        self.insert::<I>(descriptor, flow.runner())?;
        Ok(flow)
    }

    /// Look up a flow by name
    pub fn get(&self, name: &str) -> Option<&FlowEntry> {
        self.flows.get(name)
    }

    /// Registered flows in registration order
    pub fn flows(&self) -> impl Iterator<Item = &FlowEntry> {
        self.flows.values()
    }

    /// Descriptors of every flow in registration order
    pub fn descriptors(&self) -> Vec<FlowDescriptor> {
        self.flows().map(|entry| entry.descriptor().clone()).collect()
    }

    /// Number of registered flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether no flow is registered
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn check_name(&self, name: &str) -> Result<(), DefinitionError> {
        validate_name(name)?;
        if self.flows.contains_key(name) {
            return Err(DefinitionError::DuplicateFlow(name.to_string()));
        }
        Ok(())
    }

    fn insert<I>(&mut self, descriptor: FlowDescriptor, runner: FlowRunner) -> Result<(), DefinitionError>
    where
        I: DeserializeOwned + 'static,
    {
        let input_schema = PayloadSchema::compile(&descriptor.name, descriptor.input_schema.clone())?;
        PayloadSchema::compile(&descriptor.name, descriptor.output_schema.clone())?;
        if let Some(chunk_schema) = &descriptor.chunk_schema {
            PayloadSchema::compile(&descriptor.name, chunk_schema.clone())?;
        }

        let decode_check: InputCheck = Arc::new(|input: &Value| {
            I::deserialize(input)
                .map(|_| ())
                .map_err(|e| FlowError::invalid_input(format!("cannot decode input: {}", e)))
        });

        info!(flow = %descriptor.name, kind = %descriptor.kind, "Flow registered");
        let name = descriptor.name.clone();
        self.flows.insert(
            name,
            FlowEntry {
                descriptor: Arc::new(descriptor),
                input_schema: Arc::new(input_schema),
                decode_check,
                runner,
            },
        );
        Ok(())
    }
}

/// Check that `name` can be used as a flow name and route segment
pub fn validate_name(name: &str) -> Result<(), DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name must not be empty")),
        Some(first) if !first.is_ascii_alphanumeric() => {
            return Err(invalid("name must start with an ASCII letter or digit"))
        }
        Some(_) => {}
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))) {
        return Err(invalid(
            "name may only contain ASCII letters, digits, '_', '.' and '-'",
        ));
    }
    Ok(())
}
