//! Error kinds surfaced at the HTTP boundary and the JSON error envelope.
//!
//! Every error leaving the engine is one of a fixed set of [`ErrorKind`]s,
//! each with a stable wire code and an HTTP status. Typed handlers return
//! [`HandlerError`] values built from the constructor set below; anything
//! else (an `anyhow::Error` bubbling out of domain code) is mapped to
//! `Internal` with a redacted message while the original error is logged.
//!
//! The envelope is always the same shape:
//!
//! ```json
//! { "error": { "code": "...", "message": "...", "details": { ... } } }
//! ```

use serde_json::{json, Value};
use std::io;
use thiserror::Error;

/// Classified error kinds with their HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    MethodNotAllowed,
    BadRequest,
    ValidationFailure,
    Unauthorized,
    Forbidden,
    Conflict,
    TooManyRequests,
    Internal,
    Unavailable,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::BadRequest => 400,
            ErrorKind::ValidationFailure => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::Internal => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Stable wire code carried in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ValidationFailure => "validation_failed",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// A single failed field produced by the parameter binder.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldError {
    /// Field path as declared in the handler's request type.
    pub field: String,
    /// The value as given by the client (empty when absent).
    pub value: String,
    /// Stable human-readable reason, e.g. `not an integer`.
    pub reason: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Domain error returned by typed handlers, mapped to the HTTP boundary.
#[derive(Debug, Error)]
#[error("{}: {message}", kind.code())]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a structured `details` object to the envelope.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Validation failure carrying all per-field errors.
    pub fn validation(fields: Vec<FieldError>) -> Self {
        Self::new(ErrorKind::ValidationFailure, "request validation failed")
            .with_details(json!({ "fields": fields }))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Render the JSON error envelope for this error.
    pub fn envelope(&self) -> Value {
        envelope(self.kind.code(), &self.message, self.details.clone())
    }
}

impl From<anyhow::Error> for HandlerError {
    /// Unmapped errors become 500 with a redacted message; callers log the
    /// original before converting when they need the full chain recorded.
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unmapped handler error");
        Self::internal("internal server error")
    }
}

/// Build the standard error envelope.
pub fn envelope(code: &str, message: &str, details: Option<Value>) -> Value {
    match details {
        Some(d) => json!({ "error": { "code": code, "message": message, "details": d } }),
        None => json!({ "error": { "code": code, "message": message } }),
    }
}

/// Errors raised during route registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A terminal already exists for the same method and path, a parameter
    /// child with a different name exists at the same node, or a wildcard
    /// is followed by further segments.
    #[error("route conflict on {method} {path}: {reason}")]
    Conflict {
        method: http::Method,
        path: String,
        reason: String,
    },

    /// Registered path is malformed (must begin with `/`, captures need names).
    #[error("invalid route path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Errors raised by the streaming core.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Peer violated the framing protocol; fatal, transitions to Closing.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Frame or message exceeded the configured size limit; fatal.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    /// The bounded write queue was full; the connection is closed as a
    /// slow consumer and the send fails immediately.
    #[error("write queue full, slow consumer")]
    SlowConsumer,

    /// The connection is no longer open for enqueues.
    #[error("connection closed")]
    Closed,

    /// Upgrade request was not a valid handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::MethodNotAllowed.status(), 405);
        assert_eq!(ErrorKind::ValidationFailure.status(), 400);
        assert_eq!(ErrorKind::TooManyRequests.status(), 429);
        assert_eq!(ErrorKind::Unavailable.status(), 503);
    }

    #[test]
    fn validation_envelope_carries_field_details() {
        let err = HandlerError::validation(vec![FieldError::new(
            "limit",
            "abc",
            "not an integer",
        )]);
        let env = err.envelope();
        assert_eq!(env["error"]["code"], "validation_failed");
        assert_eq!(env["error"]["details"]["fields"][0]["field"], "limit");
        assert_eq!(env["error"]["details"]["fields"][0]["value"], "abc");
        assert_eq!(
            env["error"]["details"]["fields"][0]["reason"],
            "not an integer"
        );
    }

    #[test]
    fn plain_envelope_omits_details() {
        let env = HandlerError::not_found("no such pet").envelope();
        assert!(env["error"].get("details").is_none());
        assert_eq!(env["error"]["code"], "not_found");
    }
}
