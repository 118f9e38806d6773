//! # Staged HTTP Core
//!
//! Core types for running HTTP requests through a staged, cancellable
//! lifecycle with local and namespace-wide hooks.
//!
//! This crate holds everything that does not perform I/O:
//!
//! - **Request args**: [`HttpRequestArgs`], the validated description of one request
//! - **Lifecycle events**: [`HttpEventArgs`], handed to every hook at every stage
//! - **Outcomes**: [`HttpRequestStatus`], [`HttpError`] and the immutable
//!   [`CompletedHttpRequest`] snapshot
//! - **Transport contract**: the [`Transport`] trait that concrete adapters implement
//! - **Environment**: injected dependencies such as the [`Clock`](environment::Clock)
//!
//! The runtime crate wires these into a per-request pipeline.
//!
//! ## Example
//!
//! ```
//! use staged_http_core::{HttpRequestArgs, ResponseType};
//! use std::time::Duration;
//!
//! let args = HttpRequestArgs::get("/users")
//!     .with_header("Accept", "application/json")?
//!     .with_response_type(ResponseType::Json)
//!     .with_timeout(Duration::from_secs(5))
//!     .on_success(|event| {
//!         println!("loaded {}", event.status_code());
//!         Ok(())
//!     });
//!
//! assert_eq!(args.method(), Some("GET"));
//! # Ok::<(), staged_http_core::ValidationError>(())
//! ```

pub mod completed;
pub mod error;
pub mod event;
pub mod request;
pub mod response;
pub mod status;
pub mod transport;

// Re-export commonly used types
pub use completed::{CompletedHttpRequest, RequestId, is_success_status};
pub use error::{HttpError, TransportError, ValidationError};
pub use event::{HttpEventArgs, HttpStage, LifecycleControl, NoopControl, StepKind};
pub use request::{
    AllCompleteHook, HeaderKey, HeaderValue, HookResult, HttpHook, HttpRequestArgs,
    HttpRequestHeader,
};
pub use response::{ResponseBody, ResponseType};
pub use status::HttpRequestStatus;
pub use transport::{ReadyState, SignalFuture, Transport, TransportFactory, TransportSignal};

/// Boxed error returned by user hooks and step handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Environment module - Dependency injection traits
///
/// External dependencies the runtime needs but should not hard-code are
/// abstracted behind traits and injected when the manager is built.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The runtime stamps every request with the time it was submitted and
    /// the time its completion snapshot was taken.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
