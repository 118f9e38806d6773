//! # Pipeline Executor
//!
//! A generic, ordered, single-run stage runner.
//!
//! A [`Pipeline`] owns a carried state value `S` and a list of [`Step`]s.
//! Steps run strictly in registration order. Several steps may share a key;
//! they form a key group that runs in registration order too.
//!
//! ## Control
//!
//! While a step runs it can, through its [`StepContext`]:
//!
//! - **seek** to a key: once the step returns, the run jumps to the first
//!   step with that key after the current one. Seeking is forward-only;
//!   targets that don't exist ahead are ignored.
//! - **pause**: once the step returns, the run waits until resumed.
//! - **stop propagation**: the remaining steps of the current key group are
//!   skipped.
//!
//! ## Jobs
//!
//! A step handler is synchronous. An effectful step returns
//! [`StepAction::Await`] with a future; the run waits for it and applies the
//! continuation it yields to the state.
//!
//! ## Crashes
//!
//! Handler errors and panics are routed to the crash handler, which may seek.
//! With `end_on_crash` disabled (the default) the run then carries on and
//! always reaches natural completion.
//!
//! ## Example
//!
//! ```
//! use staged_http_runtime::pipeline::{Pipeline, Step, StepAction};
//! use staged_http_core::StepKind;
//!
//! # tokio_test::block_on(async {
//! let mut pipeline = Pipeline::new("example", Vec::<char>::new());
//! pipeline.add_step(Step::new("a", "first", StepKind::Event, |trace: &mut Vec<char>, ctx| {
//!     trace.push('a');
//!     ctx.seek("c");
//!     Ok(StepAction::Continue)
//! }));
//! pipeline.add_step(Step::new("b", "skipped", StepKind::Event, |trace: &mut Vec<char>, _| {
//!     trace.push('b');
//!     Ok(StepAction::Continue)
//! }));
//! pipeline.add_step(Step::new("c", "last", StepKind::Event, |trace: &mut Vec<char>, _| {
//!     trace.push('c');
//!     Ok(StepAction::Continue)
//! }));
//!
//! let trace = pipeline.execute(|trace| trace).await?;
//! assert_eq!(trace, vec!['a', 'c']);
//! # Ok::<(), staged_http_runtime::pipeline::PipelineError>(())
//! # }).unwrap();
//! ```

use crate::metrics::PipelineMetrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use staged_http_core::{BoxError, StepKind};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// Continuation produced by a job; applied to the state once the job finished.
pub type Continuation<S> = Box<dyn FnOnce(&mut S, &StepContext) -> Result<(), BoxError> + Send>;

/// Future driven by an effectful step.
pub type JobFuture<S> = BoxFuture<'static, Continuation<S>>;

/// Step handler. Runs at most once.
pub type StepHandler<S> =
    Box<dyn FnOnce(&mut S, &StepContext) -> Result<StepAction<S>, BoxError> + Send>;

/// Crash handler invoked with the state, the failing step's context and the error.
pub type CrashHandler<S> = Box<dyn Fn(&mut S, &StepContext, BoxError) + Send + Sync>;

/// What a step asks the executor to do next.
pub enum StepAction<S> {
    /// The step is done.
    Continue,
    /// Wait for the job, then apply its continuation.
    Await(JobFuture<S>),
}

impl<S> fmt::Debug for StepAction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Await(_) => f.write_str("Await(..)"),
        }
    }
}

/// Errors returned by [`Pipeline::execute`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A step failed and the pipeline is configured to end on crash.
    #[error("step {name} ({key}) crashed: {message}")]
    Crashed {
        /// Key of the failing step.
        key: &'static str,
        /// Name of the failing step.
        name: String,
        /// Rendered error.
        message: String,
    },
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// `execute` has not been called.
    #[default]
    NotStarted,
    /// Steps are running.
    Running,
    /// Waiting for `resume`.
    Paused,
    /// All steps ran.
    Completed,
    /// A step failed and the run ended early.
    Crashed,
}

/// One registered step.
pub struct Step<S> {
    key: &'static str,
    name: String,
    kind: StepKind,
    handler: StepHandler<S>,
}

impl<S> Step<S> {
    /// Create a step.
    pub fn new<F>(key: &'static str, name: impl Into<String>, kind: StepKind, handler: F) -> Self
    where
        F: FnOnce(&mut S, &StepContext) -> Result<StepAction<S>, BoxError> + Send + 'static,
    {
        Self {
            key,
            name: name.into(),
            kind,
            handler: Box::new(handler),
        }
    }

    /// Step key.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        self.kind
    }
}

impl<S> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ControlState {
    status: PipelineStatus,
    current_key: Option<&'static str>,
    seek: Option<String>,
    stopped_key: Option<&'static str>,
}

/// Shared run controls.
///
/// One controller belongs to one run. It can be handed out before the run
/// starts so external parties (lifecycle hooks, request snapshots) can pause,
/// resume and seek.
#[derive(Debug)]
pub struct PipelineController {
    state: Mutex<ControlState>,
    paused: watch::Sender<bool>,
}

impl PipelineController {
    /// Create a controller for a run that has not started.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (paused, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(ControlState::default()),
            paused,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current run status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.lock().status
    }

    /// Key of the step currently running, if any.
    #[must_use]
    pub fn current_key(&self) -> Option<&'static str> {
        self.lock().current_key
    }

    /// Request a forward seek to `key`, applied once the current step returns.
    ///
    /// A later request replaces an earlier one.
    pub fn seek(&self, key: &str) {
        tracing::trace!(target_key = key, "Seek requested");
        self.lock().seek = Some(key.to_string());
    }

    /// Whether a seek is pending.
    #[must_use]
    pub fn has_pending_seek(&self) -> bool {
        self.lock().seek.is_some()
    }

    /// Skip the remaining steps that share the current step's key.
    pub fn stop_propagation(&self) {
        let mut state = self.lock();
        state.stopped_key = state.current_key;
    }

    /// Whether propagation was stopped for the current key group.
    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        let state = self.lock();
        state.stopped_key.is_some() && state.stopped_key == state.current_key
    }

    /// Pause the run once the current step returns.
    pub fn pause(&self) {
        tracing::debug!("Pipeline pause requested");
        self.paused.send_replace(true);
    }

    /// Resume a paused run. Returns `false` if it was not paused.
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.send_replace(false);
        if was_paused {
            tracing::debug!("Pipeline resumed");
        }
        was_paused
    }

    /// Whether a pause is in effect or pending.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    fn set_status(&self, status: PipelineStatus) {
        self.lock().status = status;
    }

    // Returns false when the step belongs to a key group whose propagation was stopped.
    fn enter(&self, key: &'static str) -> bool {
        let mut state = self.lock();
        if state.stopped_key == Some(key) {
            return false;
        }
        state.stopped_key = None;
        state.current_key = Some(key);
        true
    }

    fn take_seek(&self) -> Option<String> {
        self.lock().seek.take()
    }

    async fn wait_while_paused(&self) {
        if !self.is_paused() {
            return;
        }
        self.set_status(PipelineStatus::Paused);
        let mut receiver = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = receiver.wait_for(|paused| !*paused).await;
        self.set_status(PipelineStatus::Running);
    }
}

/// What a running step sees.
#[derive(Debug, Clone)]
pub struct StepContext {
    key: &'static str,
    name: String,
    kind: StepKind,
    index: usize,
    controller: Arc<PipelineController>,
}

impl StepContext {
    /// Key of the running step.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Name of the running step.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the running step.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        self.kind
    }

    /// Position of the running step.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Run controls.
    #[must_use]
    pub const fn controller(&self) -> &Arc<PipelineController> {
        &self.controller
    }

    /// See [`PipelineController::seek`].
    pub fn seek(&self, key: &str) {
        self.controller.seek(key);
    }

    /// See [`PipelineController::pause`].
    pub fn pause(&self) {
        self.controller.pause();
    }

    /// See [`PipelineController::resume`].
    pub fn resume(&self) -> bool {
        self.controller.resume()
    }

    /// See [`PipelineController::stop_propagation`].
    pub fn stop_propagation(&self) {
        self.controller.stop_propagation();
    }

    /// Current run status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.controller.status()
    }
}

/// Ordered single-run stage runner.
pub struct Pipeline<S> {
    name: String,
    state: S,
    steps: Vec<Step<S>>,
    controller: Arc<PipelineController>,
    crash_handler: Option<CrashHandler<S>>,
    end_on_crash: bool,
}

impl<S: Send + 'static> Pipeline<S> {
    /// Create a pipeline with a fresh controller.
    #[must_use]
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self::with_controller(name, state, PipelineController::new())
    }

    /// Create a pipeline driven by an existing controller.
    #[must_use]
    pub fn with_controller(
        name: impl Into<String>,
        state: S,
        controller: Arc<PipelineController>,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            steps: Vec::new(),
            controller,
            crash_handler: None,
            end_on_crash: false,
        }
    }

    /// Append a step.
    pub fn add_step(&mut self, step: Step<S>) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Install the crash handler.
    #[must_use]
    pub fn on_crash<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &StepContext, BoxError) + Send + Sync + 'static,
    {
        self.crash_handler = Some(Box::new(handler));
        self
    }

    /// End the run when a step fails.
    #[must_use]
    pub const fn with_end_on_crash(mut self, end_on_crash: bool) -> Self {
        self.end_on_crash = end_on_crash;
        self
    }

    /// Run controls.
    #[must_use]
    pub fn controller(&self) -> Arc<PipelineController> {
        Arc::clone(&self.controller)
    }

    /// Registered steps.
    #[must_use]
    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }

    /// Run all steps and build the result from the final state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Crashed`] when a step fails and the pipeline
    /// ends on crash. Never fails otherwise.
    pub async fn execute<R, B>(self, build: B) -> Result<R, PipelineError>
    where
        B: FnOnce(S) -> R,
    {
        let Self {
            name: pipeline,
            mut state,
            steps,
            controller,
            crash_handler,
            end_on_crash,
        } = self;

        let keys: Vec<&'static str> = steps.iter().map(|step| step.key).collect();
        let mut steps: Vec<Option<Step<S>>> = steps.into_iter().map(Some).collect();

        controller.set_status(PipelineStatus::Running);
        tracing::debug!(pipeline = %pipeline, steps = keys.len(), "Pipeline started");

        let mut index = 0;
        while index < steps.len() {
            let Some(step) = steps[index].take() else {
                index += 1;
                continue;
            };

            if !controller.enter(step.key) {
                tracing::trace!(pipeline = %pipeline, key = step.key, name = %step.name, "Propagation stopped, skipping step");
                index += 1;
                continue;
            }

            let context = StepContext {
                key: step.key,
                name: step.name,
                kind: step.kind,
                index,
                controller: Arc::clone(&controller),
            };
            tracing::trace!(pipeline = %pipeline, key = context.key, name = %context.name, "Running step");

            if let Err(error) = run_step(step.handler, &mut state, &context).await {
                let message = error.to_string();
                tracing::warn!(
                    pipeline = %pipeline,
                    key = context.key,
                    name = %context.name,
                    error = %message,
                    "Step crashed"
                );

                if let Some(handler) = &crash_handler {
                    let handled = panic::catch_unwind(AssertUnwindSafe(|| {
                        handler(&mut state, &context, error);
                    }));
                    if let Err(payload) = handled {
                        tracing::error!(
                            pipeline = %pipeline,
                            error = %panic_message(payload.as_ref()),
                            "Crash handler panicked"
                        );
                    }
                }

                if end_on_crash {
                    controller.set_status(PipelineStatus::Crashed);
                    return Err(PipelineError::Crashed {
                        key: context.key,
                        name: context.name,
                        message,
                    });
                }
            }

            index = apply_seek(&pipeline, &keys, &controller, &context, index + 1);

            if controller.is_paused() {
                controller.wait_while_paused().await;
                // Seeks requested while paused (e.g. an external cancel) land
                // before the next step runs.
                if controller.has_pending_seek() {
                    index = apply_seek(&pipeline, &keys, &controller, &context, index);
                }
            }
        }

        controller.set_status(PipelineStatus::Completed);
        tracing::debug!(pipeline = %pipeline, "Pipeline completed");
        Ok(build(state))
    }
}

impl<S> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("end_on_crash", &self.end_on_crash)
            .finish_non_exhaustive()
    }
}

async fn run_step<S: Send>(
    handler: StepHandler<S>,
    state: &mut S,
    context: &StepContext,
) -> Result<(), BoxError> {
    let action = panic::catch_unwind(AssertUnwindSafe(|| handler(state, context)))
        .map_err(|payload| panic_error(payload.as_ref()))??;

    if let StepAction::Await(job) = action {
        let continuation = AssertUnwindSafe(job)
            .catch_unwind()
            .await
            .map_err(|payload| panic_error(payload.as_ref()))?;
        panic::catch_unwind(AssertUnwindSafe(|| continuation(state, context)))
            .map_err(|payload| panic_error(payload.as_ref()))??;
    }

    Ok(())
}

/// Resolve a pending seek to the first step with the target key at or after
/// `next`, the step that would otherwise run next. Returns `next` when there
/// is no seek or no such step.
fn apply_seek(
    pipeline: &str,
    keys: &[&'static str],
    controller: &PipelineController,
    context: &StepContext,
    next: usize,
) -> usize {
    let Some(target) = controller.take_seek() else {
        return next;
    };
    if let Some(found) = (next..keys.len()).find(|&i| keys[i] == target) {
        tracing::debug!(
            pipeline = %pipeline,
            from = context.key,
            to = %target,
            skipped = found - context.index() - 1,
            "Seeking forward"
        );
        PipelineMetrics::record_seek();
        found
    } else {
        tracing::warn!(
            pipeline = %pipeline,
            from = context.key,
            to = %target,
            "Ignoring seek: no step with that key ahead"
        );
        next
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn panic_error(payload: &(dyn Any + Send)) -> BoxError {
    format!("handler panicked: {}", panic_message(payload)).into()
}
