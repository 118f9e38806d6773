//! `reqwest`-backed [`Transport`].
//!
//! The request timeout is raced against the whole exchange, body included,
//! so an expired timeout always surfaces as [`TransportSignal::Timeout`].
//! HTTP error statuses are not transport failures: any received response
//! ends in [`TransportSignal::Load`].

use crate::config::ReqwestTransportConfig;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use staged_http_core::{
    ReadyState, ResponseBody, ResponseType, SignalFuture, Transport, TransportError,
    TransportFactory, TransportSignal,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Builds one [`ReqwestTransport`] per request, sharing a connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransportFactory {
    client: Client,
    base_url: Option<Url>,
}

impl ReqwestTransportFactory {
    /// Build the shared client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the base URL doesn't parse and
    /// [`TransportError::Network`] if the client can't be built.
    pub fn new(config: &ReqwestTransportConfig) -> Result<Self, TransportError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|base| Url::parse(base).map_err(|_| TransportError::InvalidUrl(base.to_string())))
            .transpose()?;

        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        tracing::debug!(base_url = ?config.base_url, "reqwest transport factory ready");
        Ok(Self { client, base_url })
    }

    /// Use an existing client.
    #[must_use]
    pub const fn with_client(client: Client, base_url: Option<Url>) -> Self {
        Self { client, base_url }
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(ReqwestTransport::new(
            self.client.clone(),
            self.base_url.clone(),
        )))
    }
}

#[derive(Debug, Default)]
struct ExchangeState {
    ready_state: ReadyState,
    method: Option<Method>,
    url: Option<Url>,
    headers: HeaderMap,
    with_credentials: bool,
    timeout: Option<Duration>,
    response_type: ResponseType,
    status: u16,
    response: Option<ResponseBody>,
}

/// One HTTP exchange over `reqwest`.
///
/// `with_credentials` is recorded but has no effect: the shared client keeps
/// no cookie store.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<Url>,
    state: Arc<Mutex<ExchangeState>>,
    aborted: watch::Sender<bool>,
}

impl ReqwestTransport {
    /// Create an unopened transport.
    #[must_use]
    pub fn new(client: Client, base_url: Option<Url>) -> Self {
        Self {
            client,
            base_url,
            state: Arc::new(Mutex::new(ExchangeState::default())),
            aborted: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        Url::parse(url)
            .ok()
            .or_else(|| self.base_url.as_ref().and_then(|base| base.join(url).ok()))
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))
    }
}

fn request_method(state: &ExchangeState) -> &str {
    state.method.as_ref().map_or("GET", Method::as_str)
}

fn finish(state: &Mutex<ExchangeState>, status: u16, body: Option<&[u8]>) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let response_type = state.response_type;
    state.ready_state = ReadyState::Done;
    state.status = status;
    state.response = body.and_then(|bytes| ResponseBody::decode(response_type, bytes));
}

impl Transport for ReqwestTransport {
    fn open(&self, method: &str, url: &str) -> Result<(), TransportError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(method.to_string()))?;
        let url = self.resolve(url)?;

        let mut state = self.lock();
        if state.ready_state == ReadyState::Loading {
            return Err(TransportError::AlreadySent);
        }
        state.method = Some(method);
        state.url = Some(url);
        state.headers.clear();
        state.ready_state = ReadyState::Opened;
        Ok(())
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        self.lock().with_credentials = with_credentials;
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<(), TransportError> {
        let invalid = || TransportError::InvalidHeader {
            name: name.to_string(),
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;

        let mut state = self.lock();
        if state.ready_state != ReadyState::Opened {
            return Err(TransportError::NotOpened);
        }
        state.headers.append(header_name, header_value);
        Ok(())
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.lock().timeout = timeout;
    }

    fn set_response_type(&self, response_type: ResponseType) {
        self.lock().response_type = response_type;
    }

    fn send(&self, body: Option<Vec<u8>>) -> Result<SignalFuture, TransportError> {
        let (request, timeout) = {
            let mut state = self.lock();
            match state.ready_state {
                ReadyState::Opened => {}
                ReadyState::Unsent => return Err(TransportError::NotOpened),
                ReadyState::Loading | ReadyState::Done => return Err(TransportError::AlreadySent),
            }
            let (Some(method), Some(url)) = (state.method.clone(), state.url.clone()) else {
                return Err(TransportError::NotOpened);
            };

            let mut request = self
                .client
                .request(method, url)
                .headers(state.headers.clone());
            if let Some(body) = body {
                request = request.body(body);
            }
            tracing::trace!(
                method = %request_method(&state),
                with_credentials = state.with_credentials,
                timeout = ?state.timeout,
                "Sending request"
            );
            state.ready_state = ReadyState::Loading;
            (request, state.timeout)
        };

        let state = Arc::clone(&self.state);
        let mut aborted = self.aborted.subscribe();

        Ok(async move {
            let exchange = async {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let bytes = response.bytes().await?;
                Ok::<_, reqwest::Error>((status, bytes))
            };

            let bounded = async {
                match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, exchange).await.ok(),
                    None => Some(exchange.await),
                }
            };

            tokio::select! {
                outcome = bounded => match outcome {
                    Some(Ok((status, bytes))) => {
                        finish(&state, status, Some(&bytes));
                        TransportSignal::Load
                    }
                    Some(Err(error)) if error.is_timeout() => {
                        finish(&state, 0, None);
                        TransportSignal::Timeout
                    }
                    Some(Err(error)) => {
                        tracing::debug!(error = %error, "HTTP exchange failed");
                        finish(&state, 0, None);
                        TransportSignal::Error
                    }
                    None => {
                        finish(&state, 0, None);
                        TransportSignal::Timeout
                    }
                },
                _ = aborted.wait_for(|aborted| *aborted) => {
                    finish(&state, 0, None);
                    TransportSignal::LoadEnd
                }
            }
        }
        .boxed())
    }

    fn abort(&self) {
        self.aborted.send_replace(true);
        let mut state = self.lock();
        if state.ready_state != ReadyState::Unsent {
            state.ready_state = ReadyState::Done;
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.lock().ready_state
    }

    fn status(&self) -> u16 {
        self.lock().status
    }

    fn response(&self) -> Option<ResponseBody> {
        self.lock().response.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.lock().timeout
    }
}
