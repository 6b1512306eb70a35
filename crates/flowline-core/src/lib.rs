//!
//! Flowline Core - flow and step execution for Flowline
//!
//! This crate defines named flows, the steps they run, streaming flows that
//! emit ordered chunks with backpressure, the per-invocation execution
//! context with its trace and cancellation signal, and the registry the
//! HTTP adapter exposes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Per-invocation execution context
pub mod context;

/// Error types
pub mod error;

/// Synchronous flows
pub mod flow;

/// Flow registry and type-erased entries
pub mod registry;

/// Payload schemas
pub mod schema;

/// Step runner
pub mod step;

/// Streaming flows and chunk delivery
pub mod streaming;

/// Execution trace
pub mod trace;

// Re-export main API types for easy use
pub use context::FlowContext;
pub use error::{DefinitionError, ErrorStatus, FlowError, FlowResult};
pub use flow::{Flow, FlowRunner};
pub use registry::{FlowDescriptor, FlowEntry, FlowKind, FlowRegistry};
pub use schema::PayloadSchema;
pub use step::run;
pub use streaming::{ChunkSink, Emitter, FlowStream, StreamingFlow};
pub use trace::{RecordKind, RecordStatus, StepRecord, Trace};
