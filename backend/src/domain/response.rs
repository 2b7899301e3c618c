//! Result shapes produced by use-cases, consumers and middlewares.
//!
//! [`Response`] is the canonical HTTP envelope; its `code` doubles as the
//! HTTP status. [`AsyncResult`] decides ack versus nack for pub/sub. A
//! middleware answers with [`MiddlewareOutcome`] so short-circuiting is
//! explicit rather than encoded in a sentinel code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::error::{Error, ErrorCode};

/// Canonical response envelope.
///
/// `data` and `errors` are omitted from JSON when absent.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use skeleton::domain::Response;
///
/// let ok = Response::ok(json!([{ "id": 1 }]));
/// assert!(ok.status);
/// assert_eq!(ok.http_status(), 200);
///
/// let denied = Response::error(401, "Missing authorization header");
/// assert!(!denied.status);
/// let body = serde_json::to_value(&denied).unwrap();
/// assert!(body.get("data").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: u16,
    pub status: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

fn is_success(code: u16) -> bool {
    code == 0 || (200..300).contains(&code)
}

impl Response {
    /// Envelope carrying `data` with the given code.
    pub fn success(code: u16, data: impl Into<Value>) -> Self {
        Self {
            code,
            status: is_success(code),
            timestamp: Utc::now(),
            data: non_null(data.into()),
            errors: None,
            message: None,
        }
    }

    /// `200` envelope carrying `data`.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self::success(200, data)
    }

    /// Serialize `data` into a success envelope. Serialization failures
    /// become a redacted `500`.
    pub fn from_data<T: Serialize>(code: u16, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::success(code, value),
            Err(err) => Self::from(Error::internal(format!(
                "failed to serialise response data: {err}"
            ))),
        }
    }

    /// Failure envelope with `errors` set.
    pub fn error(code: u16, errors: impl Into<Value>) -> Self {
        Self {
            code,
            status: is_success(code),
            timestamp: Utc::now(),
            data: None,
            errors: non_null(errors.into()),
            message: None,
        }
    }

    /// Attach a human readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Status to put on the wire; `0` means `200`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.code == 0 { 200 } else { self.code }
    }
}

impl From<Error> for Response {
    /// Internal errors are logged in full and answered with a generic
    /// message.
    fn from(err: Error) -> Self {
        if err.code() == ErrorCode::InternalError {
            error!(
                error = %err.message(),
                trace_id = err.trace_id(),
                details = ?err.details(),
                "internal error"
            );
        }
        let mut response = Self::error(err.code().http_status(), err.public_message());
        if let Some(details) = err.details().filter(|_| err.code() != ErrorCode::InternalError) {
            response.data = Some(details.clone());
        }
        response
    }
}

/// Outcome of one middleware step.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    /// Continue with the next middleware or the use-case.
    Proceed,
    /// Stop here and answer with this response.
    Reject(Response),
}

impl MiddlewareOutcome {
    /// Reject with an error envelope.
    pub fn reject(code: u16, errors: impl Into<Value>) -> Self {
        Self::Reject(Response::error(code, errors))
    }

    /// The status this outcome stands for; `200` when proceeding.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Proceed => 200,
            Self::Reject(response) => response.http_status(),
        }
    }
}

impl From<Response> for MiddlewareOutcome {
    fn from(response: Response) -> Self {
        if response.http_status() == 200 {
            Self::Proceed
        } else {
            Self::Reject(response)
        }
    }
}

impl From<Error> for MiddlewareOutcome {
    fn from(err: Error) -> Self {
        Self::Reject(Response::from(err))
    }
}

/// Result of consuming one asynchronous message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AsyncResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for AsyncResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failed(err),
        }
    }
}
