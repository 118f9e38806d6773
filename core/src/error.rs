//! Error types for staged HTTP requests.
//!
//! Three families of errors exist:
//!
//! - [`ValidationError`]: a request field was assigned a value outside its
//!   domain. Raised synchronously at assignment, so the request never enters
//!   a pipeline.
//! - [`TransportError`]: a [`Transport`](crate::Transport) refused an
//!   operation (open, header, send).
//! - [`HttpError`]: the cloneable error value carried by a running request and
//!   surfaced to hooks and completion snapshots.

use crate::event::StepKind;
use std::fmt;
use thiserror::Error;

/// Errors raised while building or mutating [`HttpRequestArgs`](crate::HttpRequestArgs).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field was given a value of the wrong type.
    ///
    /// Produced when decoding loosely typed request descriptions, e.g.
    /// `url must be a string.`
    #[error("{field} must be {expected}.")]
    WrongType {
        /// The offending field name.
        field: &'static str,
        /// Human readable description of the accepted type.
        expected: &'static str,
    },

    /// The HTTP method is empty or not a valid token.
    #[error("method must be a valid HTTP method token, got {0:?}.")]
    InvalidMethod(String),

    /// A header name is empty or contains characters outside the token set.
    #[error("header name {0:?} is not a valid token.")]
    InvalidHeaderName(String),

    /// A header value contains a line break or NUL.
    #[error("header value for {name:?} contains forbidden characters.")]
    InvalidHeaderValue {
        /// Name of the header whose value was rejected.
        name: String,
    },

    /// The content type contains a line break or NUL.
    #[error("contentType contains forbidden characters.")]
    InvalidContentType,

    /// The response type string is not one of the known hints.
    #[error("responseType {0:?} is not a known response type.")]
    UnknownResponseType(String),

    /// A timeout was negative or not finite.
    #[error("timeout must be a non-negative number, got {0}.")]
    NegativeTimeout(String),

    /// A timeout was too large to represent as a duration.
    #[error("timeout {0} is too large.")]
    TimeoutTooLarge(String),

    /// A loosely typed request description was not a JSON object.
    #[error("request description must be an object.")]
    NotAnObject,
}

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// An operation that requires `open()` was called first.
    #[error("transport has not been opened")]
    NotOpened,

    /// The transport rejected a header.
    #[error("transport rejected header {name:?}")]
    InvalidHeader {
        /// Name of the rejected header.
        name: String,
    },

    /// `send()` was called twice.
    #[error("request has already been sent")]
    AlreadySent,

    /// The transport does not accept the method.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// The URL could not be resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The underlying client failed before a request could be dispatched.
    #[error("network failure: {0}")]
    Network(String),
}

/// Error value attached to a request record.
///
/// `HttpError` is cloneable so it can be shared between the running request,
/// lifecycle hooks and the final [`CompletedHttpRequest`](crate::CompletedHttpRequest).
/// It remembers which step produced it.
///
/// # Example
///
/// ```
/// use staged_http_core::{HttpError, HttpStage, StepKind};
///
/// let error = HttpError::new("HTTP Error: Server Returned 404", StepKind::Job, HttpStage::SendRequest.key());
/// assert_eq!(error.to_string(), "HTTP Error: Server Returned 404");
/// assert_eq!(error.step_key(), "http.send");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HttpError {
    message: String,
    step_kind: StepKind,
    step_key: &'static str,
    cause: Option<String>,
}

impl HttpError {
    /// Create an error attributed to a step.
    #[must_use]
    pub fn new(message: impl Into<String>, step_kind: StepKind, step_key: &'static str) -> Self {
        Self {
            message: message.into(),
            step_kind,
            step_key,
            cause: None,
        }
    }

    /// Attach the rendered underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Kind of the step that produced the error.
    #[must_use]
    pub const fn step_kind(&self) -> StepKind {
        self.step_kind
    }

    /// Key of the step that produced the error.
    #[must_use]
    pub const fn step_key(&self) -> &'static str {
        self.step_key
    }

    /// Underlying cause, if one was recorded.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}
