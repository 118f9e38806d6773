//! In-memory transports for deterministic request tests.
//!
//! - [`MockReply`]: what a URL answers with
//! - [`MockTransport`]: one scripted transport, inspectable after the run
//! - [`MockTransportFactory`]: routes URLs to replies and keeps every transport it built

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks only panic when a test already panicked

use futures::FutureExt;
use staged_http_core::{
    ReadyState, ResponseBody, ResponseType, SignalFuture, Transport, TransportError,
    TransportFactory, TransportSignal,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Scripted answer for a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with a status code and body after `delay`.
    Respond {
        /// HTTP status code.
        status: u16,
        /// Raw body bytes.
        body: Vec<u8>,
        /// Time before the answer arrives.
        delay: Duration,
    },
    /// Fail at the network level.
    NetworkError,
    /// End without a classified outcome.
    Drop,
    /// Never answer. Ends only on timeout or abort.
    Hang,
}

impl MockReply {
    /// `200` with a text body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::with_status(200, body)
    }

    /// Any status with a text body.
    #[must_use]
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Respond {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    /// `200` with a JSON body.
    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }

    /// Delay the answer. Has no effect on non-response replies.
    #[must_use]
    pub fn delayed(self, delay: Duration) -> Self {
        match self {
            Self::Respond { status, body, .. } => Self::Respond { status, body, delay },
            other => other,
        }
    }
}

impl Default for MockReply {
    fn default() -> Self {
        Self::ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct MockState {
    ready_state: ReadyState,
    method: Option<String>,
    url: Option<String>,
    headers: Vec<(String, String)>,
    with_credentials: bool,
    timeout: Option<Duration>,
    response_type: Option<ResponseType>,
    status: u16,
    response: Option<ResponseBody>,
    sent_body: Option<Vec<u8>>,
    sent: bool,
}

#[derive(Debug, Default)]
struct RouteTable {
    routes: Mutex<HashMap<String, MockReply>>,
    fallback: Mutex<MockReply>,
    rejected_headers: Mutex<Vec<String>>,
}

impl RouteTable {
    fn reply_for(&self, url: &str) -> MockReply {
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    fn rejects(&self, name: &str) -> bool {
        self.rejected_headers
            .lock()
            .unwrap()
            .iter()
            .any(|rejected| rejected.eq_ignore_ascii_case(name))
    }
}

/// Scripted transport.
///
/// Answers according to its factory's routes. A configured timeout races the
/// answer, and [`Transport::abort`] ends a pending send with `LoadEnd`.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    routes: Arc<RouteTable>,
    aborted: watch::Sender<bool>,
    abort_called: AtomicBool,
}

impl MockTransport {
    fn new(routes: Arc<RouteTable>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            routes,
            aborted: watch::Sender::new(false),
            abort_called: AtomicBool::new(false),
        }
    }

    /// Method passed to `open`.
    #[must_use]
    pub fn method(&self) -> Option<String> {
        self.state.lock().unwrap().method.clone()
    }

    /// URL passed to `open`.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.state.lock().unwrap().url.clone()
    }

    /// Headers accepted so far, in the order they were set.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().headers.clone()
    }

    /// Value of an accepted header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Whether credentials were requested.
    #[must_use]
    pub fn with_credentials(&self) -> bool {
        self.state.lock().unwrap().with_credentials
    }

    /// Response type hint, if one was set.
    #[must_use]
    pub fn response_type(&self) -> Option<ResponseType> {
        self.state.lock().unwrap().response_type
    }

    /// Body passed to `send`.
    #[must_use]
    pub fn sent_body(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().sent_body.clone()
    }

    /// Whether `send` was called.
    #[must_use]
    pub fn was_sent(&self) -> bool {
        self.state.lock().unwrap().sent
    }

    /// Whether `abort` was called.
    #[must_use]
    pub fn was_aborted(&self) -> bool {
        self.abort_called.load(Ordering::SeqCst)
    }

    fn finish(state: &Mutex<MockState>, status: u16, body: Option<&[u8]>) {
        let mut state = state.lock().unwrap();
        let response_type = state.response_type.unwrap_or_default();
        state.ready_state = ReadyState::Done;
        state.status = status;
        state.response = body.and_then(|bytes| ResponseBody::decode(response_type, bytes));
    }
}

impl Transport for MockTransport {
    fn open(&self, method: &str, url: &str) -> Result<(), TransportError> {
        if url.is_empty() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.method = Some(method.to_string());
        state.url = Some(url.to_string());
        state.ready_state = ReadyState::Opened;
        Ok(())
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        self.state.lock().unwrap().with_credentials = with_credentials;
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<(), TransportError> {
        if self.routes.rejects(name) {
            return Err(TransportError::InvalidHeader {
                name: name.to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        if state.ready_state != ReadyState::Opened {
            return Err(TransportError::NotOpened);
        }
        state.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().unwrap().timeout = timeout;
    }

    fn set_response_type(&self, response_type: ResponseType) {
        self.state.lock().unwrap().response_type = Some(response_type);
    }

    fn send(&self, body: Option<Vec<u8>>) -> Result<SignalFuture, TransportError> {
        let (url, timeout) = {
            let mut state = self.state.lock().unwrap();
            if state.ready_state == ReadyState::Unsent {
                return Err(TransportError::NotOpened);
            }
            if state.sent {
                return Err(TransportError::AlreadySent);
            }
            state.sent = true;
            state.sent_body = body;
            state.ready_state = ReadyState::Loading;
            (state.url.clone().unwrap_or_default(), state.timeout)
        };

        let reply = self.routes.reply_for(&url);
        tracing::trace!(url = %url, ?reply, ?timeout, "Mock transport sending");
        let state = Arc::clone(&self.state);
        let mut aborted = self.aborted.subscribe();

        Ok(async move {
            let answer = async {
                match reply {
                    MockReply::Respond { status, body, delay } => {
                        tokio::time::sleep(delay).await;
                        Self::finish(&state, status, Some(&body));
                        TransportSignal::Load
                    }
                    MockReply::NetworkError => {
                        Self::finish(&state, 0, None);
                        TransportSignal::Error
                    }
                    MockReply::Drop => {
                        Self::finish(&state, 0, None);
                        TransportSignal::LoadEnd
                    }
                    MockReply::Hang => futures::future::pending().await,
                }
            };

            let expiry = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                signal = answer => signal,
                () = expiry => {
                    Self::finish(&state, 0, None);
                    TransportSignal::Timeout
                }
                _ = aborted.wait_for(|aborted| *aborted) => {
                    Self::finish(&state, 0, None);
                    TransportSignal::LoadEnd
                }
            }
        }
        .boxed())
    }

    fn abort(&self) {
        self.abort_called.store(true, Ordering::SeqCst);
        self.aborted.send_replace(true);
        let mut state = self.state.lock().unwrap();
        if state.ready_state != ReadyState::Unsent {
            state.ready_state = ReadyState::Done;
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready_state
    }

    fn status(&self) -> u16 {
        self.state.lock().unwrap().status
    }

    fn response(&self) -> Option<ResponseBody> {
        self.state.lock().unwrap().response.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.state.lock().unwrap().timeout
    }
}

/// Builds [`MockTransport`]s and remembers them.
///
/// Clones share routes and the list of built transports, so a test can keep
/// one clone and hand another to the manager.
///
/// # Example
///
/// ```
/// use staged_http_testing::{MockReply, MockTransportFactory};
/// use staged_http_core::TransportFactory;
///
/// let factory = MockTransportFactory::new()
///     .route("/users", MockReply::ok(r#"[{"id":1}]"#))
///     .route("/missing", MockReply::with_status(404, "not found"));
///
/// let transport = factory.create().unwrap();
/// assert_eq!(factory.created().len(), 1);
/// # drop(transport);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    routes: Arc<RouteTable>,
    created: Arc<Mutex<Vec<Arc<MockTransport>>>>,
    fail_construction: Arc<AtomicBool>,
}

impl MockTransportFactory {
    /// Factory answering every URL with an empty `200`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `reply`.
    #[must_use]
    pub fn route(self, url: impl Into<String>, reply: MockReply) -> Self {
        self.routes.routes.lock().unwrap().insert(url.into(), reply);
        self
    }

    /// Answer unrouted URLs with `reply`.
    #[must_use]
    pub fn fallback(self, reply: MockReply) -> Self {
        *self.routes.fallback.lock().unwrap() = reply;
        self
    }

    /// Make transports reject a header name.
    #[must_use]
    pub fn reject_header(self, name: impl Into<String>) -> Self {
        self.routes.rejected_headers.lock().unwrap().push(name.into());
        self
    }

    /// Make `create` fail.
    #[must_use]
    pub fn failing(self) -> Self {
        self.fail_construction.store(true, Ordering::SeqCst);
        self
    }

    /// Every transport built so far, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().unwrap().clone()
    }

    /// The most recently built transport.
    #[must_use]
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().unwrap().last().cloned()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail_construction.load(Ordering::SeqCst) {
            return Err(TransportError::Network("transport construction disabled".to_string()));
        }
        let transport = Arc::new(MockTransport::new(Arc::clone(&self.routes)));
        self.created.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}
