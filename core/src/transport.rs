//! Transport abstraction.
//!
//! A [`Transport`] is the request/response primitive a pipeline drives:
//! open, configure, send, and then wait for exactly one terminal
//! [`TransportSignal`]. Implementations use interior mutability so one handle
//! can be shared between the running pipeline, lifecycle hooks (which may
//! cancel) and request snapshots.
//!
//! # Lifecycle
//!
//! ```text
//! Unsent ──open()──▶ Opened ──send()──▶ Loading ──signal──▶ Done
//!                                          │
//!                                       abort() ──▶ Done (LoadEnd)
//! ```
//!
//! # Implementations
//!
//! - `MockTransport` in `staged-http-testing` - scripted, in-memory
//! - `ReqwestTransport` in `staged-http-reqwest` - production HTTP client

use crate::error::TransportError;
use crate::response::{ResponseBody, ResponseType};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Future resolving to the single terminal signal of a sent request.
pub type SignalFuture = BoxFuture<'static, TransportSignal>;

/// Terminal signal raised by a transport after `send()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportSignal {
    /// A response arrived. Status and body are readable.
    Load,
    /// The network failed before a response arrived.
    Error,
    /// The configured timeout elapsed.
    Timeout,
    /// The exchange ended without any of the other signals, e.g. after `abort()`.
    LoadEnd,
}

/// Readiness of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadyState {
    /// Not opened yet.
    #[default]
    Unsent,
    /// Opened; headers and options may be set.
    Opened,
    /// Sent and waiting for a terminal signal.
    Loading,
    /// A terminal signal was raised.
    Done,
}

/// One-request HTTP transport.
///
/// # Errors
///
/// Configuration methods fail with [`TransportError`] when called in the wrong
/// state or with values the underlying client refuses.
pub trait Transport: Send + Sync {
    /// Open the transport for `method` and `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened with these values.
    fn open(&self, method: &str, url: &str) -> Result<(), TransportError>;

    /// Include credentials (cookies, auth) with the request.
    fn set_with_credentials(&self, with_credentials: bool);

    /// Append a request header.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidHeader`] when the header is refused and
    /// [`TransportError::NotOpened`] before `open()`.
    fn set_request_header(&self, name: &str, value: &str) -> Result<(), TransportError>;

    /// Set the timeout. `None` disables it.
    fn set_timeout(&self, timeout: Option<Duration>);

    /// Set the response decoding hint.
    fn set_response_type(&self, response_type: ResponseType);

    /// Send the request with an optional body.
    ///
    /// The returned future resolves once, with the terminal signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be dispatched at all.
    fn send(&self, body: Option<Vec<u8>>) -> Result<SignalFuture, TransportError>;

    /// Abort an in-flight request. The pending signal resolves to
    /// [`TransportSignal::LoadEnd`] unless another signal already fired.
    fn abort(&self);

    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Whether a terminal signal has been raised.
    fn is_done(&self) -> bool {
        self.ready_state() == ReadyState::Done
    }

    /// HTTP status code, `0` until a response arrived.
    fn status(&self) -> u16;

    /// Decoded response body, if any.
    fn response(&self) -> Option<ResponseBody>;

    /// Configured timeout.
    fn timeout(&self) -> Option<Duration>;
}

/// Creates one fresh [`Transport`] per submitted request.
pub trait TransportFactory: Send + Sync {
    /// Construct a transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed. The request
    /// then fails with an `Exception` status when it tries to open.
    fn create(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Result<Arc<dyn Transport>, TransportError> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self()
    }
}
