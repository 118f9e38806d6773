//! Lifecycle stages and the event object handed to hooks.
//!
//! Every request runs through the same fixed sequence of stages:
//!
//! ```text
//! BeforeSend → OpenRequest → SendRequest → Success → RequestComplete
//!                                                         │
//!                  Error ◀──── (seek on failure)          │ (seek)
//!                    │                                    ▼
//!                    └──────────────────────────────▶ Complete → AllComplete
//! ```
//!
//! Hook stages hold a local step (the request's own hook) followed by a
//! global step (the namespace hook). Job stages drive the transport.

use crate::completed::is_success_status;
use crate::error::HttpError;
use crate::request::HttpRequestArgs;
use crate::response::ResponseBody;
use crate::status::HttpRequestStatus;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// A request-local hook.
    Event,
    /// A namespace-wide hook.
    GlobalEvent,
    /// An effectful step that may suspend.
    Job,
}

/// A named point in the per-request stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpStage {
    /// Before the transport is opened.
    BeforeSend,
    /// Opening and configuring the transport.
    OpenRequest,
    /// Sending and waiting for a terminal signal.
    SendRequest,
    /// A success response arrived.
    Success,
    /// Bookkeeping that routes the success path past the error stage.
    RequestComplete,
    /// Something failed.
    Error,
    /// Always reached once per request.
    Complete,
    /// Batch accounting for the namespace.
    AllComplete,
}

impl HttpStage {
    /// All stages in execution order.
    pub const ORDER: [Self; 8] = [
        Self::BeforeSend,
        Self::OpenRequest,
        Self::SendRequest,
        Self::Success,
        Self::RequestComplete,
        Self::Error,
        Self::Complete,
        Self::AllComplete,
    ];

    /// Stable step key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::BeforeSend => "http.beforesend",
            Self::OpenRequest => "http.open",
            Self::SendRequest => "http.send",
            Self::Success => "http.success",
            Self::RequestComplete => "http.request.complete",
            Self::Error => "http.error",
            Self::Complete => "http.complete",
            Self::AllComplete => "http.complete.all",
        }
    }

    /// Look up a stage by key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ORDER.into_iter().find(|stage| stage.key() == key)
    }

    /// Whether hooks at this stage see the transport handle.
    #[must_use]
    pub const fn attaches_transport(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Complete)
    }

    /// Whether this stage runs user hooks (as opposed to transport jobs).
    #[must_use]
    pub const fn is_hook_stage(self) -> bool {
        matches!(
            self,
            Self::BeforeSend | Self::Success | Self::Error | Self::Complete
        )
    }
}

impl fmt::Display for HttpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Run controls exposed to hooks.
///
/// Implemented by the runtime for each request.
pub trait LifecycleControl: Send + Sync {
    /// Suspend the run after the current hook returns, until resumed.
    fn pause(&self);

    /// Resume a paused run. Returns `false` if the run was not paused.
    fn resume(&self) -> bool;

    /// Skip the remaining handlers registered under the current stage key.
    fn stop_propagation(&self);

    /// Whether `stop_propagation` was called for the current stage.
    fn is_propagation_stopped(&self) -> bool {
        false
    }

    /// Abort the transport, mark the request cancelled and jump to completion.
    fn cancel(&self);
}

/// Controls that do nothing. Used for detached event objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopControl;

impl LifecycleControl for NoopControl {
    fn pause(&self) {}

    fn resume(&self) -> bool {
        false
    }

    fn stop_propagation(&self) {}

    fn cancel(&self) {}
}

/// Event object handed to every lifecycle hook.
///
/// The request args are mutable. Changes, in particular replacing the
/// context, are carried into later stages.
pub struct HttpEventArgs {
    request: HttpRequestArgs,
    transport: Option<Arc<dyn Transport>>,
    error: Option<HttpError>,
    response: Option<ResponseBody>,
    status: HttpRequestStatus,
    stage: HttpStage,
    control: Arc<dyn LifecycleControl>,
}

impl HttpEventArgs {
    /// Create an event object for `stage`.
    #[must_use]
    pub fn new(
        request: HttpRequestArgs,
        stage: HttpStage,
        status: HttpRequestStatus,
        control: Arc<dyn LifecycleControl>,
    ) -> Self {
        Self {
            request,
            transport: None,
            error: None,
            response: None,
            status,
            stage,
            control,
        }
    }

    /// Attach the transport handle.
    #[must_use]
    pub fn with_transport(mut self, transport: Option<Arc<dyn Transport>>) -> Self {
        self.transport = transport;
        self
    }

    /// Attach the current error.
    #[must_use]
    pub fn with_error(mut self, error: Option<HttpError>) -> Self {
        self.error = error;
        self
    }

    /// Attach the current response.
    #[must_use]
    pub fn with_response(mut self, response: Option<ResponseBody>) -> Self {
        self.response = response;
        self
    }

    /// The request args.
    #[must_use]
    pub const fn request(&self) -> &HttpRequestArgs {
        &self.request
    }

    /// Mutable request args.
    pub const fn request_mut(&mut self) -> &mut HttpRequestArgs {
        &mut self.request
    }

    /// The carried context.
    #[must_use]
    pub const fn context(&self) -> &serde_json::Value {
        self.request.context()
    }

    /// Mutable carried context.
    pub const fn context_mut(&mut self) -> &mut serde_json::Value {
        self.request.context_mut()
    }

    /// Replace the carried context.
    pub fn set_context(&mut self, context: serde_json::Value) {
        self.request.set_context(context);
    }

    /// Transport handle. Present only for success, error and complete hooks.
    #[must_use]
    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    /// Current error. Present only when the status carries one.
    #[must_use]
    pub const fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// Current response.
    #[must_use]
    pub const fn response(&self) -> Option<&ResponseBody> {
        self.response.as_ref()
    }

    /// Status when the hook was invoked.
    #[must_use]
    pub const fn status(&self) -> HttpRequestStatus {
        self.status
    }

    /// Stage being run.
    #[must_use]
    pub const fn stage(&self) -> HttpStage {
        self.stage
    }

    /// Key of the stage being run.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.stage.key()
    }

    /// HTTP status code reported by the transport, `0` when unavailable.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.transport.as_ref().map_or(0, |transport| transport.status())
    }

    /// Whether the status code is a success code.
    #[must_use]
    pub fn success(&self) -> bool {
        is_success_status(self.status_code())
    }

    /// Suspend the run once this hook returns.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Resume a paused run.
    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    /// Skip remaining handlers registered under this stage key.
    pub fn stop_propagation(&self) {
        self.control.stop_propagation();
    }

    /// Whether propagation was stopped at this stage.
    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.control.is_propagation_stopped()
    }

    /// Cancel the request.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Give back the (possibly modified) request args.
    #[must_use]
    pub fn into_request(self) -> HttpRequestArgs {
        self.request
    }
}

impl fmt::Debug for HttpEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEventArgs")
            .field("stage", &self.stage)
            .field("status", &self.status)
            .field("request", &self.request)
            .field("has_transport", &self.transport.is_some())
            .field("error", &self.error)
            .field("response", &self.response)
            .finish()
    }
}
