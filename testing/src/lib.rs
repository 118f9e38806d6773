//! # Staged HTTP Testing
//!
//! Testing utilities and helpers for staged HTTP requests.
//!
//! This crate provides:
//! - Scripted in-memory transports
//! - A deterministic clock
//! - A hook call recorder
//! - A Given-When-Then harness for single requests
//!
//! ## Example
//!
//! ```ignore
//! use staged_http_testing::{HookRecorder, MockReply, MockTransportFactory, test_clock};
//! use staged_http_runtime::{HttpManager, HttpManagerConfig};
//!
//! #[tokio::test]
//! async fn test_not_found_runs_error_hooks() {
//!     let factory = MockTransportFactory::new().route("/missing", MockReply::with_status(404, ""));
//!     let manager = HttpManager::with_clock(factory, HttpManagerConfig::default(), test_clock());
//!     let recorder = HookRecorder::new();
//!
//!     let completed = manager
//!         .execute_request_async(HttpRequestArgs::get("/missing").on_error(recorder.hook("local")))
//!         .await;
//!
//!     assert_eq!(completed.status_code, 404);
//!     assert_eq!(recorder.keys(), vec!["http.error"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use staged_http_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;

    /// Clock that never moves.
    ///
    /// Submission and completion timestamps taken from it are equal, so
    /// snapshots compare exactly.
    ///
    /// # Example
    ///
    /// ```
    /// use staged_http_testing::mocks::FixedClock;
    /// use staged_http_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Clock stuck at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock pinned to 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(NEW_YEAR_2025_DAYS))
    }

    /// Days between the Unix epoch and 2025-01-01.
    const NEW_YEAR_2025_DAYS: i64 = 20_089;
}

/// Scripted transports
pub mod transport;

/// Hook call recording
pub mod recorder;


/// Property-based testing utilities using proptest.
pub mod properties {
    use crate::transport::MockReply;
    use proptest::prelude::*;

    /// Any status code a server might answer with.
    pub fn status_code() -> impl Strategy<Value = u16> {
        prop_oneof![
            3 => 200u16..=299,
            1 => Just(304u16),
            2 => 400u16..=599,
        ]
    }

    /// Any scripted reply that eventually ends without a timeout.
    pub fn finite_reply() -> impl Strategy<Value = MockReply> {
        prop_oneof![
            4 => (status_code(), proptest::collection::vec(any::<u8>(), 0..32))
                .prop_map(|(status, body)| MockReply::with_status(status, body)),
            1 => Just(MockReply::NetworkError),
            1 => Just(MockReply::Drop),
        ]
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
pub use recorder::{BatchCall, HookCall, HookRecorder};
pub use request_test::RequestTest;
pub use transport::{MockReply, MockTransport, MockTransportFactory};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_pinned() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
