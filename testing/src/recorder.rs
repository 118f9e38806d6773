//! Hook call recording.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use staged_http_core::{
    CompletedHttpRequest, HookResult, HttpEventArgs, HttpRequestStatus, RequestId,
};
use std::sync::{Arc, Mutex};

/// One observed hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    /// Label given when the hook was created.
    pub label: String,
    /// Stage key the hook ran under.
    pub key: &'static str,
    /// Request status at invocation.
    pub status: HttpRequestStatus,
    /// Transport status code, `0` when no transport was attached.
    pub status_code: u16,
    /// Whether the transport was attached.
    pub has_transport: bool,
    /// Error message, if an error was attached.
    pub error: Option<String>,
    /// Context as seen by the hook.
    pub context: serde_json::Value,
}

/// One observed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCall {
    /// Label given when the hook was created.
    pub label: String,
    /// Request ids in completion order.
    pub request_ids: Vec<RequestId>,
}

/// Records hook invocations in order.
///
/// Clones share the same log.
///
/// ```ignore
/// let recorder = HookRecorder::new();
/// let args = HttpRequestArgs::get("/ok")
///     .on_success(recorder.hook("local"))
///     .on_complete(recorder.hook("local"));
/// // ... run it ...
/// assert_eq!(recorder.keys(), vec!["http.success", "http.complete"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookRecorder {
    calls: Arc<Mutex<Vec<HookCall>>>,
    batches: Arc<Mutex<Vec<BatchCall>>>,
}

impl HookRecorder {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A lifecycle hook that records itself and succeeds.
    pub fn hook(&self, label: impl Into<String>) -> impl Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static {
        self.hook_with(label, |_| Ok(()))
    }

    /// A lifecycle hook that records itself, then runs `then`.
    pub fn hook_with<F>(
        &self,
        label: impl Into<String>,
        then: F,
    ) -> impl Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let label = label.into();
        move |event: &mut HttpEventArgs| {
            calls.lock().unwrap().push(HookCall {
                label: label.clone(),
                key: event.key(),
                status: event.status(),
                status_code: event.status_code(),
                has_transport: event.transport().is_some(),
                error: event.error().map(|error| error.message().to_string()),
                context: event.context().clone(),
            });
            then(event)
        }
    }

    /// A batch hook that records the request ids it receives.
    pub fn batch_hook(
        &self,
        label: impl Into<String>,
    ) -> impl Fn(&[CompletedHttpRequest]) -> HookResult + Send + Sync + 'static {
        let batches = Arc::clone(&self.batches);
        let label = label.into();
        move |batch: &[CompletedHttpRequest]| {
            batches.lock().unwrap().push(BatchCall {
                label: label.clone(),
                request_ids: batch.iter().map(|completed| completed.request_id).collect(),
            });
            Ok(())
        }
    }

    /// All recorded hook calls.
    #[must_use]
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded stage keys, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|call| call.key).collect()
    }

    /// Recorded `label@key` pairs, in order.
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| format!("{}@{}", call.label, call.key))
            .collect()
    }

    /// All recorded batches.
    #[must_use]
    pub fn batches(&self) -> Vec<BatchCall> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of recorded calls for a stage key.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.key == key).count()
    }
}
