//! Completion snapshots.

use crate::error::HttpError;
use crate::request::HttpRequestArgs;
use crate::response::ResponseBody;
use crate::status::HttpRequestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether a status code counts as success: `[200, 300)` or `304`.
#[must_use]
pub const fn is_success_status(status_code: u16) -> bool {
    matches!(status_code, 200..=299 | 304)
}

/// Immutable snapshot of a finished request.
///
/// Produced once per request when its namespace batch closes, or directly for
/// single-request callers.
#[derive(Debug, Clone)]
pub struct CompletedHttpRequest {
    /// Identifier assigned at submission.
    pub request_id: RequestId,
    /// Decoded response, if any terminal signal produced one.
    pub response: Option<ResponseBody>,
    /// The request args as they stood when the request finished.
    pub request: HttpRequestArgs,
    /// Error recorded along the way.
    pub error: Option<HttpError>,
    /// Final status.
    pub request_status: HttpRequestStatus,
    /// HTTP status code reported by the transport, `0` when none arrived.
    pub status_code: u16,
    /// Namespace the request ran in.
    pub namespace: Option<String>,
    /// Time the request was submitted.
    pub started_at: DateTime<Utc>,
    /// Time the snapshot was taken.
    pub completed_at: DateTime<Utc>,
}

impl CompletedHttpRequest {
    /// Whether the status code is a success code.
    #[must_use]
    pub const fn success(&self) -> bool {
        is_success_status(self.status_code)
    }

    /// Wall time between submission and completion.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}
