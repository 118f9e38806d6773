//! Bubbling event dispatcher.
//!
//! Each namespace owns one [`BubblingEvents`] dispatcher. Listeners are
//! registered by event name; lifecycle stages dispatch under their stage key
//! (`http.success`, …) after the namespace hook for that stage, so a hook that
//! stops propagation also silences the listeners.

use staged_http_core::{HookResult, HttpEventArgs, HttpHook};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// How a listener is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerOptions {
    /// Remove the listener after its first invocation.
    pub once: bool,
    /// Higher priorities run first. Ties run in registration order.
    pub priority: i32,
}

impl ListenerOptions {
    /// Remove the listener after its first invocation.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Handle returned when registering a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    /// Unique listener id. Can be passed to `remove_event_listener`.
    pub id: Uuid,
    /// Event name the listener was registered under.
    pub event_name: String,
}

struct Listener {
    id: Uuid,
    hook: HttpHook,
    options: ListenerOptions,
    sequence: u64,
}

/// Named listener registry for one namespace.
#[derive(Default)]
pub struct BubblingEvents {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    sequence: AtomicU64,
}

impl BubblingEvents {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for `event_name`.
    pub fn add_event_listener<F>(
        &self,
        event_name: impl Into<String>,
        listener: F,
        options: ListenerOptions,
    ) -> ListenerHandle
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        let id = Uuid::new_v4();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        self.lock().entry(event_name.clone()).or_default().push(Listener {
            id,
            hook: Arc::new(listener),
            options,
            sequence,
        });

        tracing::debug!(event_name = %event_name, listener_id = %id, priority = options.priority, "Listener added");
        ListenerHandle { id, event_name }
    }

    /// Remove listeners by event name (all of them) or by listener id.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove_event_listener(&self, name_or_id: &str) -> bool {
        let mut listeners = self.lock();

        if listeners.remove(name_or_id).is_some() {
            tracing::debug!(event_name = name_or_id, "Listeners removed by name");
            return true;
        }

        let Ok(id) = Uuid::parse_str(name_or_id) else {
            return false;
        };

        let mut removed = false;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|listener| listener.id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        if removed {
            tracing::debug!(listener_id = %id, "Listener removed by id");
        }
        removed
    }

    /// Number of listeners registered for `event_name`.
    #[must_use]
    pub fn listener_count(&self, event_name: &str) -> usize {
        self.lock().get(event_name).map_or(0, Vec::len)
    }

    /// Invoke the listeners of `event_name` in priority order.
    ///
    /// `once` listeners are removed before they run. Dispatch stops early if
    /// a listener stops propagation.
    ///
    /// # Errors
    ///
    /// Returns the first listener error; later listeners don't run.
    pub fn dispatch(&self, event_name: &str, event: &mut HttpEventArgs) -> HookResult {
        let ordered: Vec<HttpHook> = {
            let mut listeners = self.lock();
            let Some(entries) = listeners.get_mut(event_name) else {
                return Ok(());
            };

            let mut selected: Vec<(i32, u64, HttpHook)> = entries
                .iter()
                .map(|listener| (listener.options.priority, listener.sequence, Arc::clone(&listener.hook)))
                .collect();
            entries.retain(|listener| !listener.options.once);
            if entries.is_empty() {
                listeners.remove(event_name);
            }

            selected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            selected.into_iter().map(|(_, _, hook)| hook).collect()
        };

        for hook in ordered {
            hook(event)?;
            if event.is_propagation_stopped() {
                tracing::trace!(event_name, "Listener stopped propagation");
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BubblingEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.lock();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.len()))
            .collect();
        f.debug_struct("BubblingEvents").field("listeners", &counts).finish()
    }
}
