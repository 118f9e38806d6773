//! Request status tracking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a request is in its lifecycle.
///
/// A request moves `NotStarted → Opened → Sent` and then reaches exactly one
/// outcome. `Complete` is the outcome of the success path; every other
/// outcome is kept as the final status so it can be inspected on the
/// completion snapshot.
///
/// The discriminants are stable and appear in logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum HttpRequestStatus {
    /// Submitted but the transport has not been opened.
    #[default]
    NotStarted = 0,
    /// The transport was opened and configured.
    Opened = 1,
    /// The transport accepted the request body.
    Sent = 2,
    /// The success path finished.
    Complete = 3,
    /// A hook cancelled the request.
    Canceled = 4,
    /// The server answered with a non-success status, or the network failed.
    Failed = 5,
    /// Opening or sending threw, or a hook crashed.
    Exception = 6,
    /// The request exceeded its timeout.
    TimedOut = 7,
    /// The exchange ended without load, error or timeout.
    Aborted = 8,
}

impl HttpRequestStatus {
    /// Whether this status is a final outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::Opened | Self::Sent)
    }

    /// Whether the lifecycle event object should expose the recorded error.
    ///
    /// Aborted and cancelled requests still carry an error on the snapshot,
    /// but hooks only see errors for these three outcomes.
    #[must_use]
    pub const fn carries_error(self) -> bool {
        matches!(self, Self::Exception | Self::Failed | Self::TimedOut)
    }

    /// Stable lowercase name used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Opened => "opened",
            Self::Sent => "sent",
            Self::Complete => "complete",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Exception => "exception",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for HttpRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
