//! Batch-completion ledger.
//!
//! Tracks active requests and buffers completion snapshots per namespace.
//! When the last active request of a namespace finishes, every buffered
//! snapshot of that namespace is drained as one batch.
//!
//! [`BatchLedger::finish`] is the whole critical section: remove from active,
//! buffer, count the namespace's remaining active requests and drain. Callers
//! hold one lock around it so two requests finishing together can neither
//! both emit nor both skip.

use staged_http_core::{CompletedHttpRequest, RequestId};

/// Active requests plus buffered completions.
///
/// `T` is whatever the caller keeps per active request.
#[derive(Debug)]
pub struct BatchLedger<T> {
    active: Vec<ActiveEntry<T>>,
    completed: Vec<CompletedHttpRequest>,
}

#[derive(Debug)]
struct ActiveEntry<T> {
    id: RequestId,
    namespace: Option<String>,
    value: T,
}

impl<T> BatchLedger<T> {
    /// Empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// Track a newly submitted request.
    pub fn register(&mut self, id: RequestId, namespace: Option<String>, value: T) {
        self.active.push(ActiveEntry { id, namespace, value });
    }

    /// Active requests in submission order, optionally filtered by namespace.
    pub fn active<'a>(&'a self, namespace: Option<Option<&'a str>>) -> impl Iterator<Item = &'a T> + 'a {
        self.active
            .iter()
            .filter(move |entry| namespace.is_none_or(|ns| entry.namespace.as_deref() == ns))
            .map(|entry| &entry.value)
    }

    /// Number of active requests.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of buffered snapshots.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.completed.len()
    }

    /// Record a finished request.
    ///
    /// Returns the namespace batch, in completion order, when this was the
    /// namespace's last active request.
    pub fn finish(&mut self, completed: CompletedHttpRequest) -> Option<Vec<CompletedHttpRequest>> {
        let id = completed.request_id;
        let namespace = completed.namespace.clone();

        self.active.retain(|entry| entry.id != id);
        self.completed.push(completed);

        let remaining = self
            .active
            .iter()
            .filter(|entry| entry.namespace == namespace)
            .count();
        if remaining > 0 {
            tracing::trace!(request_id = %id, namespace = ?namespace, remaining, "Batch still open");
            return None;
        }

        let (batch, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.completed)
            .into_iter()
            .partition(|entry| entry.namespace == namespace);
        self.completed = rest;

        tracing::debug!(namespace = ?namespace, size = batch.len(), "Batch closed");
        Some(batch)
    }
}

impl<T> Default for BatchLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}
