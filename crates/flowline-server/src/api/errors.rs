//! Error handling for the Flowline Server API
//!
//! Every failure reaches the client as the same document,
//! `{"error": {"status", "message", "details"?}}`, either as a response body
//! or inside the terminal event of a stream.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flowline_core::{ErrorStatus, FlowError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Body of an error document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Canonical status string, e.g. `INVALID_ARGUMENT`
    pub status: String,
    /// Human readable message
    pub message: String,
    /// Structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&FlowError> for ErrorBody {
    fn from(err: &FlowError) -> Self {
        let root = err.root_cause();
        let mut details = err.details().cloned();

        if let Some(step) = err.step_name() {
            details = Some(match details {
                Some(Value::Object(mut map)) => {
                    map.insert("step".to_string(), json!(step));
                    Value::Object(map)
                }
                Some(other) => json!({ "step": step, "cause": other }),
                None => json!({ "step": step }),
            });
        }

        let message = match root {
            FlowError::InvalidInput { message, .. } | FlowError::Application { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };

        Self {
            status: err.status().as_str().to_string(),
            message,
            details,
        }
    }
}

/// API Error type for returning standard error responses
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),
    /// Not found (404)
    NotFound(String),
    /// Wrong method for an existing route (405)
    MethodNotAllowed(String),
    /// Request body over the configured limit (413)
    PayloadTooLarge(String),
    /// Flow failure, mapped by its status
    Flow(FlowError),
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError::Flow(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::MethodNotAllowed(msg) => write!(f, "Method Not Allowed: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload Too Large: {}", msg),
            ApiError::Flow(err) => write!(f, "Flow Error: {}", err),
        }
    }
}

impl ApiError {
    /// HTTP status of the response
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Flow(err) => status_code_for(err.status()),
        }
    }

    /// The `error` member of the response document
    pub fn body(&self) -> ErrorBody {
        let (status, msg) = match self {
            ApiError::BadRequest(msg) => (ErrorStatus::InvalidArgument, msg),
            ApiError::NotFound(msg) => (ErrorStatus::NotFound, msg),
            ApiError::MethodNotAllowed(msg) => (ErrorStatus::Unimplemented, msg),
            ApiError::PayloadTooLarge(msg) => (ErrorStatus::ResourceExhausted, msg),
            ApiError::Flow(err) => return ErrorBody::from(err),
        };
        ErrorBody {
            status: status.as_str().to_string(),
            message: msg.clone(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.body() }));
        (status, body).into_response()
    }
}

/// Non-standard code used for requests the client cancelled
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Map a canonical status onto an HTTP status code
pub fn status_code_for(status: ErrorStatus) -> StatusCode {
    match status {
        ErrorStatus::InvalidArgument | ErrorStatus::FailedPrecondition => StatusCode::BAD_REQUEST,
        ErrorStatus::NotFound => StatusCode::NOT_FOUND,
        ErrorStatus::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorStatus::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorStatus::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorStatus::Aborted => StatusCode::CONFLICT,
        ErrorStatus::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorStatus::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::BAD_REQUEST),
        ErrorStatus::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
