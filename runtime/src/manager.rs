//! # HTTP Manager
//!
//! The request orchestrator. Every submitted request gets its own
//! [`Pipeline`] run with this fixed step table:
//!
//! | Key                     | Steps                                  |
//! |-------------------------|----------------------------------------|
//! | `http.beforesend`       | local hook, namespace hook, listeners  |
//! | `http.open`             | open and configure the transport       |
//! | `http.send`             | send, wait for the terminal signal     |
//! | `http.success`          | local hook, namespace hook, listeners  |
//! | `http.request.complete` | mark complete, seek past errors        |
//! | `http.error`            | local hook, namespace hook, listeners  |
//! | `http.complete`         | local hook, namespace hook, listeners  |
//! | `http.complete.all`     | batch accounting                       |
//!
//! Failures seek forward: open/send exceptions, server errors, network errors
//! and timeouts go to `http.error`; unclassified aborts and cancellation go
//! straight to `http.complete`. A failing or panicking hook marks the request
//! as `Exception` and seeks to `http.complete`, so completion always runs
//! exactly once.
//!
//! ## Example
//!
//! ```ignore
//! let manager = HttpManager::new(ReqwestTransportFactory::new(config)?);
//!
//! manager.add_namespace(
//!     Some("users"),
//!     GlobalHttpEvents::new().on_all_complete(|batch| {
//!         tracing::info!(size = batch.len(), "users loaded");
//!         Ok(())
//!     }),
//! );
//!
//! let completed = manager
//!     .execute_request_async(HttpRequestArgs::get("/users/1").with_namespace("users"))
//!     .await;
//! assert!(completed.success());
//! ```

use crate::batch::BatchLedger;
use crate::bubbling::{ListenerHandle, ListenerOptions};
use crate::config::HttpManagerConfig;
use crate::metrics::{BatchMetrics, HttpMetrics};
use crate::namespace::{GlobalHttpEvents, NamespaceEntry, NamespaceRegistry};
use crate::pipeline::{Continuation, Pipeline, PipelineController, PipelineStatus, Step, StepAction, StepContext};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use staged_http_core::environment::{Clock, SystemClock};
use staged_http_core::{
    BoxError, CompletedHttpRequest, HookResult, HttpError, HttpEventArgs, HttpRequestArgs,
    HttpRequestStatus, HttpStage, LifecycleControl, RequestId, ResponseBody, StepKind, Transport,
    TransportError, TransportFactory, TransportSignal, ValidationError, is_success_status,
};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::Instrument;

type RequestPipeline = Pipeline<Arc<RequestShared>>;

/// Orchestrates staged HTTP requests.
///
/// Cheap to clone; clones share namespaces and bookkeeping.
#[derive(Clone)]
pub struct HttpManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transports: Arc<dyn TransportFactory>,
    namespaces: NamespaceRegistry,
    ledger: Mutex<BatchLedger<Arc<RequestShared>>>,
    config: HttpManagerConfig,
    clock: Arc<dyn Clock>,
}

impl HttpManager {
    /// Create a manager with the default configuration.
    #[must_use]
    pub fn new(transports: impl TransportFactory + 'static) -> Self {
        Self::with_config(transports, HttpManagerConfig::default())
    }

    /// Create a manager with a custom configuration.
    #[must_use]
    pub fn with_config(transports: impl TransportFactory + 'static, config: HttpManagerConfig) -> Self {
        Self::with_clock(transports, config, SystemClock)
    }

    /// Create a manager with a custom configuration and clock.
    #[must_use]
    pub fn with_clock(
        transports: impl TransportFactory + 'static,
        config: HttpManagerConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transports: Arc::new(transports),
                namespaces: NamespaceRegistry::new(),
                ledger: Mutex::new(BatchLedger::new()),
                config,
                clock: Arc::new(clock),
            }),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &HttpManagerConfig {
        &self.inner.config
    }

    /// The namespace registry.
    #[must_use]
    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.inner.namespaces
    }

    // ========== Submission ==========

    /// Submit a request and hand its completion snapshot to `callback`.
    ///
    /// The request runs on a spawned tokio task. Must be called from within a
    /// tokio runtime.
    pub fn execute_request<F>(&self, args: HttpRequestArgs, callback: F) -> RequestId
    where
        F: FnOnce(CompletedHttpRequest) + Send + 'static,
    {
        let (request_id, run) = self.submit(args);
        tokio::spawn(run.map(callback));
        request_id
    }

    /// Submit a request and await its completion snapshot.
    ///
    /// The request is registered as active immediately, so requests submitted
    /// one after another before any is awaited form one namespace batch. The
    /// returned future never fails. Dropping it early aborts the request and
    /// completes its bookkeeping.
    pub fn execute_request_async(
        &self,
        args: HttpRequestArgs,
    ) -> impl Future<Output = CompletedHttpRequest> + Send + 'static {
        self.submit(args).1
    }

    /// Decode a loosely typed request description and run it.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the description is invalid. The
    /// request is not submitted in that case.
    pub async fn execute_json(
        &self,
        description: &serde_json::Value,
    ) -> Result<CompletedHttpRequest, ValidationError> {
        let args = HttpRequestArgs::from_json(description)?;
        Ok(self.execute_request_async(args).await)
    }

    /// Snapshots of all active requests, in submission order.
    #[must_use]
    pub fn get_all_active_requests(&self) -> Vec<HttpRequestInstance> {
        self.inner
            .ledger()
            .active(None)
            .map(|shared| shared.instance())
            .collect()
    }

    /// Snapshots of the active requests of one namespace.
    #[must_use]
    pub fn get_active_requests(&self, namespace: Option<&str>) -> Vec<HttpRequestInstance> {
        self.inner
            .ledger()
            .active(Some(namespace))
            .map(|shared| shared.instance())
            .collect()
    }

    // ========== Namespaces ==========

    /// Get a namespace, creating it if absent.
    pub fn get_namespace(&self, namespace: Option<&str>) -> Arc<NamespaceEntry> {
        self.inner.namespaces.get_namespace(namespace)
    }

    /// Set a namespace's global hooks.
    pub fn add_namespace(&self, namespace: Option<&str>, events: GlobalHttpEvents) -> Arc<NamespaceEntry> {
        self.inner.namespaces.add_namespace(namespace, events)
    }

    /// Clear a namespace's global hooks. Returns `false` if it never existed.
    pub fn remove_namespace_events(&self, namespace: Option<&str>) -> bool {
        self.inner.namespaces.remove_namespace_events(namespace)
    }

    // ========== Listeners ==========

    /// Add a listener to the default namespace.
    pub fn add_event_listener<F>(
        &self,
        event_name: impl Into<String>,
        listener: F,
        options: ListenerOptions,
    ) -> ListenerHandle
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.add_namespace_event_listener(None, event_name, listener, options)
    }

    /// Add a listener to a namespace.
    pub fn add_namespace_event_listener<F>(
        &self,
        namespace: Option<&str>,
        event_name: impl Into<String>,
        listener: F,
        options: ListenerOptions,
    ) -> ListenerHandle
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.get_namespace(namespace)
            .bubbling()
            .add_event_listener(event_name, listener, options)
    }

    /// Remove listeners from the default namespace by event name or listener id.
    pub fn remove_event_listener(&self, name_or_id: &str) -> bool {
        self.remove_namespace_event_listener(None, name_or_id)
    }

    /// Remove listeners from a namespace by event name or listener id.
    pub fn remove_namespace_event_listener(&self, namespace: Option<&str>, name_or_id: &str) -> bool {
        self.get_namespace(namespace)
            .bubbling()
            .remove_event_listener(name_or_id)
    }

    // ========== Internals ==========

    fn submit(
        &self,
        args: HttpRequestArgs,
    ) -> (RequestId, impl Future<Output = CompletedHttpRequest> + Send + 'static) {
        let request_id = RequestId::new();
        let namespace = args.namespace().map(str::to_string);
        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            namespace = ?namespace,
            method = args.method().unwrap_or("GET"),
            url = args.url().unwrap_or_default(),
        );

        let entry = self.inner.namespaces.get_namespace(namespace.as_deref());
        let controller = PipelineController::new();
        let shared = Arc::new(RequestShared {
            id: request_id,
            namespace: namespace.clone(),
            started_at: self.inner.clock.now(),
            started: Instant::now(),
            controller: Arc::clone(&controller),
            record: Mutex::new(RequestRecord::new(args)),
            finished: AtomicBool::new(false),
            completed: Mutex::new(None),
        });

        self.inner
            .ledger()
            .register(request_id, namespace, Arc::clone(&shared));
        HttpMetrics::record_submitted();
        span.in_scope(|| tracing::debug!("Request submitted"));

        let pipeline = build_pipeline(&self.inner, &shared, &entry, controller);
        let guard = FinishGuard {
            inner: Arc::clone(&self.inner),
            shared,
        };

        let run = async move {
            if let Err(error) = pipeline.execute(|_| ()).await {
                tracing::error!(error = %error, "Request pipeline ended early");
            }
            guard.complete()
        }
        .instrument(span);

        (request_id, run)
    }
}

impl fmt::Debug for HttpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpManager")
            .field("config", &self.inner.config)
            .field("namespaces", &self.inner.namespaces.namespaces())
            .field("active", &self.inner.ledger().active_len())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn ledger(&self) -> MutexGuard<'_, BatchLedger<Arc<RequestShared>>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Batch accounting. Runs once per request.
    fn finish(&self, shared: &RequestShared) {
        if shared.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        let completed = shared.snapshot(self.clock.now());
        HttpMetrics::record_completed(completed.request_status, shared.started.elapsed());
        tracing::debug!(
            status = %completed.request_status,
            status_code = completed.status_code,
            "Request complete"
        );
        *shared.completed_slot() = Some(completed.clone());

        // Only the ledger mutation is under the lock; the batch hook runs outside it.
        let batch = self.ledger().finish(completed);
        let Some(batch) = batch else {
            return;
        };

        BatchMetrics::record_batch(batch.len());
        let Some(hook) = self
            .namespaces
            .get_namespace(shared.namespace.as_deref())
            .all_complete_hook()
        else {
            return;
        };

        tracing::debug!(size = batch.len(), "Emitting namespace batch");
        match panic::catch_unwind(AssertUnwindSafe(|| hook(&batch))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                HttpMetrics::record_handler_crash(HttpStage::AllComplete.key());
                tracing::warn!(error = %error, "Batch hook failed");
            }
            Err(_) => {
                HttpMetrics::record_handler_crash(HttpStage::AllComplete.key());
                tracing::warn!("Batch hook panicked");
            }
        }
    }

    fn handle_crash(&self, shared: &RequestShared, context: &StepContext, error: &BoxError) {
        HttpMetrics::record_handler_crash(context.key());

        let http_error = HttpError::new(
            format!("Step {} failed: {error}", context.name()),
            context.kind(),
            context.key(),
        )
        .with_cause(error);

        let transport = {
            let mut record = shared.lock();
            record.status = HttpRequestStatus::Exception;
            record.error = Some(http_error);
            record.transport.clone()
        };
        abort_if_open(transport.as_ref());

        let stage = HttpStage::from_key(context.key());
        if !matches!(stage, Some(HttpStage::Complete | HttpStage::AllComplete)) {
            context.seek(HttpStage::Complete.key());
        }
    }
}

/// Bookkeeping for one request, shared by its pipeline, its hooks' controls
/// and the manager's ledger.
struct RequestShared {
    id: RequestId,
    namespace: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
    controller: Arc<PipelineController>,
    record: Mutex<RequestRecord>,
    finished: AtomicBool,
    completed: Mutex<Option<CompletedHttpRequest>>,
}

struct RequestRecord {
    request: HttpRequestArgs,
    status: HttpRequestStatus,
    error: Option<HttpError>,
    response: Option<ResponseBody>,
    transport: Option<Arc<dyn Transport>>,
}

impl RequestRecord {
    const fn new(request: HttpRequestArgs) -> Self {
        Self {
            request,
            status: HttpRequestStatus::NotStarted,
            error: None,
            response: None,
            transport: None,
        }
    }
}

impl RequestShared {
    fn lock(&self) -> MutexGuard<'_, RequestRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completed_slot(&self) -> MutexGuard<'_, Option<CompletedHttpRequest>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, completed_at: DateTime<Utc>) -> CompletedHttpRequest {
        let record = self.lock();
        CompletedHttpRequest {
            request_id: self.id,
            response: record.response.clone(),
            request: record.request.clone(),
            error: record.error.clone(),
            request_status: record.status,
            status_code: record.transport.as_ref().map_or(0, |transport| transport.status()),
            namespace: self.namespace.clone(),
            started_at: self.started_at,
            completed_at,
        }
    }

    fn instance(self: &Arc<Self>) -> HttpRequestInstance {
        let record = self.lock();
        HttpRequestInstance {
            request_id: self.id,
            namespace: self.namespace.clone(),
            pipeline_status: self.controller.status(),
            request: record.request.clone(),
            request_status: record.status,
            error: record.error.clone(),
            response: record.response.clone(),
            transport: record.transport.clone(),
            started_at: self.started_at,
            shared: Arc::clone(self),
        }
    }

    fn fail(&self, status: HttpRequestStatus, error: HttpError) {
        tracing::debug!(status = %status, error = %error, "Request failed");
        let mut record = self.lock();
        record.status = status;
        record.error = Some(error);
    }

    /// Run `hook` against a fresh event object and keep its request changes.
    fn invoke<F>(self: &Arc<Self>, stage: HttpStage, hook: F) -> HookResult
    where
        F: FnOnce(&mut HttpEventArgs) -> HookResult,
    {
        let mut event = {
            let record = self.lock();
            let control: Arc<dyn LifecycleControl> = Arc::new(RequestControl {
                shared: Arc::clone(self),
                stage,
            });
            HttpEventArgs::new(record.request.clone(), stage, record.status, control)
                .with_transport(record.transport.clone().filter(|_| stage.attaches_transport()))
                .with_error(record.error.clone().filter(|_| record.status.carries_error()))
                .with_response(record.response.clone())
        };

        let result = hook(&mut event);
        self.lock().request = event.into_request();
        result
    }

    fn is_canceled(&self) -> bool {
        self.lock().status == HttpRequestStatus::Canceled
    }

    fn cancel(&self, stage: HttpStage) {
        let transport = {
            let mut record = self.lock();
            record.status = HttpRequestStatus::Canceled;
            record.transport.clone()
        };
        abort_if_open(transport.as_ref());
        tracing::debug!(stage = %stage, "Request cancelled");

        if !matches!(stage, HttpStage::Complete | HttpStage::AllComplete) {
            self.controller.seek(HttpStage::Complete.key());
        }
    }

    fn apply_signal(&self, signal: TransportSignal, context: &StepContext) {
        let mut record = self.lock();
        let Some(transport) = record.transport.clone() else {
            return;
        };
        record.response = transport.response();
        let status_code = transport.status();
        tracing::debug!(?signal, status_code, "Transport signalled");

        if record.status == HttpRequestStatus::Canceled {
            context.seek(HttpStage::Complete.key());
            return;
        }

        let send_error = |message: String| HttpError::new(message, StepKind::Job, HttpStage::SendRequest.key());
        match signal {
            TransportSignal::Load if is_success_status(status_code) => {}
            TransportSignal::Load => {
                record.status = HttpRequestStatus::Failed;
                record.error = Some(send_error(format!("HTTP Error: Server Returned {status_code}")));
                context.seek(HttpStage::Error.key());
            }
            TransportSignal::LoadEnd => {
                record.status = HttpRequestStatus::Aborted;
                record.error = Some(send_error("HTTP Error: An unknown error occurred.".to_string()));
                context.seek(HttpStage::Complete.key());
            }
            TransportSignal::Timeout => {
                let millis = transport.timeout().map_or(0, |timeout| timeout.as_millis());
                record.status = HttpRequestStatus::TimedOut;
                record.error = Some(send_error(format!(
                    "HTTP Error: Request timed out after {millis} milliseconds."
                )));
                context.seek(HttpStage::Error.key());
            }
            TransportSignal::Error => {
                record.status = HttpRequestStatus::Failed;
                record.error = Some(send_error("HTTP Error: An unknown error occurred.".to_string()));
                context.seek(HttpStage::Error.key());
            }
        }
    }
}

/// Hook-facing controls of one request at one stage.
struct RequestControl {
    shared: Arc<RequestShared>,
    stage: HttpStage,
}

impl LifecycleControl for RequestControl {
    fn pause(&self) {
        self.shared.controller.pause();
    }

    fn resume(&self) -> bool {
        self.shared.controller.resume()
    }

    fn stop_propagation(&self) {
        self.shared.controller.stop_propagation();
    }

    fn is_propagation_stopped(&self) -> bool {
        self.shared.controller.is_propagation_stopped()
    }

    fn cancel(&self) {
        self.shared.cancel(self.stage);
    }
}

/// Completes bookkeeping even if the request future is dropped early.
struct FinishGuard {
    inner: Arc<ManagerInner>,
    shared: Arc<RequestShared>,
}

impl FinishGuard {
    fn complete(self) -> CompletedHttpRequest {
        self.inner.finish(&self.shared);
        let stored = self.shared.completed_slot().clone();
        stored.unwrap_or_else(|| self.shared.snapshot(self.inner.clock.now()))
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.shared.finished.load(Ordering::SeqCst) {
            return;
        }

        tracing::warn!(request_id = %self.shared.id, "Request dropped before completion");
        let transport = {
            let mut record = self.shared.lock();
            if !record.status.is_terminal() {
                record.status = HttpRequestStatus::Aborted;
            }
            record.transport.clone()
        };
        abort_if_open(transport.as_ref());
        self.inner.finish(&self.shared);
    }
}

/// Read-only snapshot of an active request.
pub struct HttpRequestInstance {
    /// Identifier assigned at submission.
    pub request_id: RequestId,
    /// Namespace the request runs in.
    pub namespace: Option<String>,
    /// Status of the request's pipeline run.
    pub pipeline_status: PipelineStatus,
    /// Copy of the request args.
    pub request: HttpRequestArgs,
    /// Request status.
    pub request_status: HttpRequestStatus,
    /// Recorded error.
    pub error: Option<HttpError>,
    /// Captured response.
    pub response: Option<ResponseBody>,
    /// Transport handle, once opened.
    pub transport: Option<Arc<dyn Transport>>,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    shared: Arc<RequestShared>,
}

impl HttpRequestInstance {
    /// Resume the request if a hook paused it. Returns `false` otherwise.
    pub fn force_resume(&self) -> bool {
        let controller = &self.shared.controller;
        controller.is_paused() && controller.resume()
    }

    /// Cancel the request from outside its hooks.
    ///
    /// Aborts an in-flight transport, records `Canceled` and jumps to
    /// completion. Returns `false` if the request already finished.
    pub fn cancel(&self) -> bool {
        if self.shared.finished.load(Ordering::SeqCst) {
            return false;
        }
        let stage = self
            .shared
            .controller
            .current_key()
            .and_then(HttpStage::from_key)
            .unwrap_or(HttpStage::BeforeSend);
        self.shared.cancel(stage);
        true
    }
}

impl fmt::Debug for HttpRequestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequestInstance")
            .field("request_id", &self.request_id)
            .field("namespace", &self.namespace)
            .field("pipeline_status", &self.pipeline_status)
            .field("request", &self.request)
            .field("request_status", &self.request_status)
            .field("error", &self.error)
            .field("has_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

// ========== Pipeline construction ==========

const fn hook_name(stage: HttpStage) -> &'static str {
    match stage {
        HttpStage::BeforeSend => "onBeforeSend",
        HttpStage::Success => "onSuccess",
        HttpStage::Error => "onError",
        HttpStage::Complete => "onComplete",
        HttpStage::OpenRequest => "openRequest",
        HttpStage::SendRequest => "sendRequest",
        HttpStage::RequestComplete => "requestComplete",
        HttpStage::AllComplete => "onAllComplete",
    }
}

fn build_pipeline(
    inner: &Arc<ManagerInner>,
    shared: &Arc<RequestShared>,
    entry: &Arc<NamespaceEntry>,
    controller: Arc<PipelineController>,
) -> RequestPipeline {
    let crash_inner = Arc::clone(inner);
    let mut pipeline = Pipeline::with_controller(format!("http:{}", shared.id), Arc::clone(shared), controller)
        .on_crash(move |shared: &mut Arc<RequestShared>, context, error| {
            crash_inner.handle_crash(shared, context, &error);
        })
        .with_end_on_crash(inner.config.end_on_handler_crash);

    for stage in HttpStage::ORDER {
        if stage.is_hook_stage() {
            add_hook_steps(&mut pipeline, stage, entry);
            continue;
        }
        match stage {
            HttpStage::OpenRequest => {
                let inner = Arc::clone(inner);
                pipeline.add_step(Step::new(stage.key(), hook_name(stage), StepKind::Job, move |shared: &mut Arc<RequestShared>, context| {
                    open_request(&inner, shared, context);
                    Ok(StepAction::Continue)
                }));
            }
            HttpStage::SendRequest => {
                pipeline.add_step(Step::new(stage.key(), hook_name(stage), StepKind::Job, |shared: &mut Arc<RequestShared>, context| {
                    Ok(send_request(shared, context))
                }));
            }
            HttpStage::RequestComplete => {
                pipeline.add_step(Step::new(stage.key(), hook_name(stage), StepKind::Job, |shared: &mut Arc<RequestShared>, context| {
                    {
                        let mut record = shared.lock();
                        if !record.status.is_terminal() {
                            record.status = HttpRequestStatus::Complete;
                        }
                    }
                    context.seek(HttpStage::Complete.key());
                    Ok(StepAction::Continue)
                }));
            }
            HttpStage::AllComplete => {
                let inner = Arc::clone(inner);
                pipeline.add_step(Step::new(stage.key(), hook_name(stage), StepKind::GlobalEvent, move |shared: &mut Arc<RequestShared>, _| {
                    inner.finish(shared);
                    Ok(StepAction::Continue)
                }));
            }
            HttpStage::BeforeSend | HttpStage::Success | HttpStage::Error | HttpStage::Complete => {}
        }
    }

    pipeline
}

fn add_hook_steps(pipeline: &mut RequestPipeline, stage: HttpStage, entry: &Arc<NamespaceEntry>) {
    let key = stage.key();
    let name = hook_name(stage);

    pipeline.add_step(Step::new(key, name, StepKind::Event, move |shared: &mut Arc<RequestShared>, _| {
        let hook = shared.lock().request.hook(stage);
        if let Some(hook) = hook {
            shared.invoke(stage, |event| hook(event))?;
        }
        Ok(StepAction::Continue)
    }));

    let global = Arc::clone(entry);
    pipeline.add_step(Step::new(key, format!("global.{name}"), StepKind::GlobalEvent, move |shared: &mut Arc<RequestShared>, _| {
        if let Some(hook) = global.hook(stage) {
            shared.invoke(stage, |event| hook(event))?;
        }
        Ok(StepAction::Continue)
    }));

    let bubbling = Arc::clone(entry);
    pipeline.add_step(Step::new(key, format!("bubble.{name}"), StepKind::GlobalEvent, move |shared: &mut Arc<RequestShared>, _| {
        if bubbling.bubbling().listener_count(key) > 0 {
            shared.invoke(stage, |event| bubbling.bubbling().dispatch(key, event))?;
        }
        Ok(StepAction::Continue)
    }));
}

fn open_request(inner: &ManagerInner, shared: &RequestShared, context: &StepContext) {
    let open_error = |message: &str, cause: &dyn fmt::Display| {
        HttpError::new(message, StepKind::Job, HttpStage::OpenRequest.key()).with_cause(cause)
    };

    if shared.is_canceled() {
        context.seek(HttpStage::Complete.key());
        return;
    }

    let transport = match inner.transports.create() {
        Ok(transport) => transport,
        Err(error) => {
            shared.fail(HttpRequestStatus::Exception, open_error("Failed to construct transport.", &error));
            context.seek(HttpStage::Error.key());
            return;
        }
    };

    let request = {
        let mut record = shared.lock();
        record.transport = Some(Arc::clone(&transport));
        record.request.clone()
    };

    match configure_transport(transport.as_ref(), &request, inner.config.default_timeout) {
        Ok(()) => {
            let mut record = shared.lock();
            if record.status == HttpRequestStatus::Canceled {
                drop(record);
                abort_if_open(Some(&transport));
                context.seek(HttpStage::Complete.key());
                return;
            }
            if !record.status.is_terminal() {
                record.status = HttpRequestStatus::Opened;
            }
            tracing::debug!("Transport opened");
        }
        Err(error) => {
            shared.fail(HttpRequestStatus::Exception, open_error("Failed to open request.", &error));
            context.seek(HttpStage::Error.key());
        }
    }
}

fn configure_transport(
    transport: &dyn Transport,
    request: &HttpRequestArgs,
    default_timeout: Option<Duration>,
) -> Result<(), TransportError> {
    let url = request
        .url()
        .ok_or_else(|| TransportError::InvalidUrl("url is not set".to_string()))?;
    transport.open(request.method().unwrap_or("GET"), url)?;
    transport.set_with_credentials(request.with_credentials());

    if let Some(content_type) = request.content_type().filter(|value| !value.trim().is_empty()) {
        apply_header(transport, "Content-Type", content_type);
    }

    transport.set_timeout(request.timeout().or(default_timeout));

    for header in request.headers() {
        let (name, value) = header.to_pair();
        apply_header(transport, &name, &value);
    }

    if let Some(hint) = request.response_type().transport_hint() {
        transport.set_response_type(hint);
    }
    Ok(())
}

fn apply_header(transport: &dyn Transport, name: &str, value: &str) {
    if let Err(error) = transport.set_request_header(name, value) {
        tracing::warn!(header = name, error = %error, "Skipping header rejected by transport");
    }
}

fn send_request(shared: &RequestShared, context: &StepContext) -> StepAction<Arc<RequestShared>> {
    if shared.is_canceled() {
        context.seek(HttpStage::Complete.key());
        return StepAction::Continue;
    }

    let (transport, body) = {
        let record = shared.lock();
        (record.transport.clone(), record.request.body().map(<[u8]>::to_vec))
    };

    let send_error = |cause: &dyn fmt::Display| {
        HttpError::new("Failed to send request.", StepKind::Job, HttpStage::SendRequest.key()).with_cause(cause)
    };

    let Some(transport) = transport else {
        shared.fail(HttpRequestStatus::Exception, send_error(&TransportError::NotOpened));
        context.seek(HttpStage::Error.key());
        return StepAction::Continue;
    };

    match transport.send(body) {
        Ok(signal) => {
            {
                let mut record = shared.lock();
                if !record.status.is_terminal() {
                    record.status = HttpRequestStatus::Sent;
                }
            }
            tracing::trace!("Request sent, waiting for transport");
            StepAction::Await(Box::pin(async move {
                let signal = signal.await;
                let continuation: Continuation<Arc<RequestShared>> = Box::new(move |shared, context| {
                    shared.apply_signal(signal, context);
                    Ok(())
                });
                continuation
            }))
        }
        Err(error) => {
            shared.fail(HttpRequestStatus::Exception, send_error(&error));
            context.seek(HttpStage::Error.key());
            StepAction::Continue
        }
    }
}

fn abort_if_open(transport: Option<&Arc<dyn Transport>>) {
    if let Some(transport) = transport {
        if !transport.is_done() {
            transport.abort();
        }
    }
}
