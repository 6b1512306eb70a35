//! Error types for the Flowline Server
//!
//! This module contains the error types used while configuring and running
//! the server. Per-request failures are rendered by [`crate::api::errors`].

use flowline_core::DefinitionError;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A flow could not be defined
    #[error("Flow definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Socket or listener failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;
