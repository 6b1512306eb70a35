use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical status attached to a flow failure.
///
/// The HTTP layer maps each status onto a response code; the string form
/// (`INVALID_ARGUMENT`, `INTERNAL`, ...) is what clients see in the error
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    /// The request payload was rejected
    InvalidArgument,
    /// A referenced entity does not exist
    NotFound,
    /// The system is not in a state required for the operation
    FailedPrecondition,
    /// The caller lacks permission
    PermissionDenied,
    /// The caller is not authenticated
    Unauthenticated,
    /// A quota or limit was exhausted
    ResourceExhausted,
    /// The operation was aborted, typically by a concurrency issue
    Aborted,
    /// The operation is not implemented
    Unimplemented,
    /// A dependency is temporarily unavailable
    Unavailable,
    /// The operation was cancelled by the caller
    Cancelled,
    /// The deadline expired before the operation completed
    DeadlineExceeded,
    /// Catch-all for unexpected failures
    Internal,
}

impl ErrorStatus {
    /// Wire representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::InvalidArgument => "INVALID_ARGUMENT",
            ErrorStatus::NotFound => "NOT_FOUND",
            ErrorStatus::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorStatus::PermissionDenied => "PERMISSION_DENIED",
            ErrorStatus::Unauthenticated => "UNAUTHENTICATED",
            ErrorStatus::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorStatus::Aborted => "ABORTED",
            ErrorStatus::Unimplemented => "UNIMPLEMENTED",
            ErrorStatus::Unavailable => "UNAVAILABLE",
            ErrorStatus::Cancelled => "CANCELLED",
            ErrorStatus::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorStatus::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while executing a flow or one of its steps
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// The input did not match the flow's declared shape
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Human readable summary
        message: String,
        /// Individual validation failures, if any
        details: Option<Value>,
    },

    /// A named step failed
    #[error("step '{step}' failed: {source}")]
    Step {
        /// Name of the failing step
        step: String,
        /// The error returned by the step body
        source: Box<FlowError>,
    },

    /// A flow body reported failure
    #[error("{message}")]
    Application {
        /// Status reported to the caller
        status: ErrorStatus,
        /// Error message
        message: String,
        /// Optional structured details
        details: Option<Value>,
    },

    /// The chunk consumer went away or refused the chunk
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// The execution context was cancelled
    #[error("Flow execution cancelled")]
    Cancelled,

    /// The execution context deadline expired
    #[error("Flow execution deadline exceeded")]
    DeadlineExceeded,

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Application error with the `INTERNAL` status
    pub fn application(message: impl Into<String>) -> Self {
        FlowError::Application {
            status: ErrorStatus::Internal,
            message: message.into(),
            details: None,
        }
    }

    /// Application error with an explicit status
    pub fn with_status(status: ErrorStatus, message: impl Into<String>) -> Self {
        FlowError::Application {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Input validation failure without details
    pub fn invalid_input(message: impl Into<String>) -> Self {
        FlowError::InvalidInput {
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details to an application or validation error.
    /// Other variants are returned unchanged.
    pub fn with_details(self, details: Value) -> Self {
        match self {
            FlowError::Application { status, message, .. } => FlowError::Application {
                status,
                message,
                details: Some(details),
            },
            FlowError::InvalidInput { message, .. } => FlowError::InvalidInput {
                message,
                details: Some(details),
            },
            other => other,
        }
    }

    /// The innermost error, skipping step wrappers
    pub fn root_cause(&self) -> &FlowError {
        match self {
            FlowError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Name of the outermost failing step, if the error came from one
    pub fn step_name(&self) -> Option<&str> {
        match self {
            FlowError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether this is a cancellation or deadline outcome
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.root_cause(),
            FlowError::Cancelled | FlowError::DeadlineExceeded
        )
    }

    /// Status reported to callers, taken from the root cause
    pub fn status(&self) -> ErrorStatus {
        match self.root_cause() {
            FlowError::InvalidInput { .. } => ErrorStatus::InvalidArgument,
            FlowError::Application { status, .. } => *status,
            FlowError::StreamClosed(_) => ErrorStatus::Aborted,
            FlowError::Cancelled => ErrorStatus::Cancelled,
            FlowError::DeadlineExceeded => ErrorStatus::DeadlineExceeded,
            FlowError::Serialization(_) | FlowError::Internal(_) => ErrorStatus::Internal,
            FlowError::Step { .. } => ErrorStatus::Internal,
        }
    }

    /// Structured details of the root cause
    pub fn details(&self) -> Option<&Value> {
        match self.root_cause() {
            FlowError::InvalidInput { details, .. } | FlowError::Application { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow_err) => flow_err,
            Err(err) => FlowError::application(format!("{:#}", err)),
        }
    }
}

/// Configuration error raised while defining flows, before any request is served
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// A flow with this name is already registered
    #[error("Flow already registered: {0}")]
    DuplicateFlow(String),

    /// The flow name cannot be used as a route
    #[error("Invalid flow name '{name}': {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A schema derived for the flow could not be compiled
    #[error("Invalid schema for flow '{flow}': {reason}")]
    InvalidSchema {
        /// Flow being defined
        flow: String,
        /// Compiler message
        reason: String,
    },
}

/// Result alias for flow execution
pub type FlowResult<T> = Result<T, FlowError>;
