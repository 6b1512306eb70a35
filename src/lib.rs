//!
//! Flowline - register named flows, trace their steps, stream their results
//!
//! This crate re-exports the workspace crates and carries the sample flows
//! served by the `flowline` binary.

#![forbid(unsafe_code)]

pub use flowline_core;
pub use flowline_monitoring;
pub use flowline_server;

pub use flowline_core::{
    Emitter, Flow, FlowContext, FlowError, FlowRegistry, FlowResult, StreamingFlow,
};

/// Sample flows
pub mod samples;
