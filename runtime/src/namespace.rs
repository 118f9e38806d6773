//! Namespace registry.
//!
//! A namespace groups requests that share global lifecycle hooks, a bubbling
//! dispatcher and batch-completion accounting. The default namespace has no
//! name (`None`) and always exists; named namespaces are created on first
//! reference and live as long as the registry.

use crate::bubbling::BubblingEvents;
use staged_http_core::{
    AllCompleteHook, CompletedHttpRequest, HookResult, HttpEventArgs, HttpHook, HttpStage,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Global hooks shared by every request of a namespace.
#[derive(Clone, Default)]
pub struct GlobalHttpEvents {
    on_before_send: Option<HttpHook>,
    on_success: Option<HttpHook>,
    on_error: Option<HttpHook>,
    on_complete: Option<HttpHook>,
    on_all_complete: Option<AllCompleteHook>,
}

impl GlobalHttpEvents {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked before every request of the namespace is opened.
    #[must_use]
    pub fn on_before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_before_send = Some(Arc::new(hook));
        self
    }

    /// Hook invoked on every successful response.
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Hook invoked on every failure routed to the error stage.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when any request of the namespace completes.
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Hook invoked once per batch, when the last outstanding request of the
    /// namespace completes.
    #[must_use]
    pub fn on_all_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[CompletedHttpRequest]) -> HookResult + Send + Sync + 'static,
    {
        self.on_all_complete = Some(Arc::new(hook));
        self
    }

    /// The hook for a hook stage.
    #[must_use]
    pub fn hook(&self, stage: HttpStage) -> Option<HttpHook> {
        match stage {
            HttpStage::BeforeSend => self.on_before_send.clone(),
            HttpStage::Success => self.on_success.clone(),
            HttpStage::Error => self.on_error.clone(),
            HttpStage::Complete => self.on_complete.clone(),
            _ => None,
        }
    }

    /// The batch hook.
    #[must_use]
    pub fn all_complete_hook(&self) -> Option<AllCompleteHook> {
        self.on_all_complete.clone()
    }
}

impl fmt::Debug for GlobalHttpEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalHttpEvents")
            .field("on_before_send", &self.on_before_send.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_all_complete", &self.on_all_complete.is_some())
            .finish()
    }
}

/// One namespace: its global hooks and its dispatcher.
#[derive(Debug)]
pub struct NamespaceEntry {
    key: Option<String>,
    events: RwLock<GlobalHttpEvents>,
    bubbling: BubblingEvents,
}

impl NamespaceEntry {
    fn new(key: Option<String>, events: GlobalHttpEvents) -> Self {
        Self {
            key,
            events: RwLock::new(events),
            bubbling: BubblingEvents::new(),
        }
    }

    /// Namespace key. `None` is the default namespace.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Current global hooks.
    #[must_use]
    pub fn events(&self) -> GlobalHttpEvents {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The global hook for a hook stage.
    #[must_use]
    pub fn hook(&self, stage: HttpStage) -> Option<HttpHook> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hook(stage)
    }

    /// The batch hook.
    #[must_use]
    pub fn all_complete_hook(&self) -> Option<AllCompleteHook> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all_complete_hook()
    }

    /// The namespace's dispatcher.
    #[must_use]
    pub const fn bubbling(&self) -> &BubblingEvents {
        &self.bubbling
    }

    fn set_events(&self, events: GlobalHttpEvents) {
        *self.events.write().unwrap_or_else(PoisonError::into_inner) = events;
    }
}

/// Maps namespace keys to their entries.
#[derive(Debug)]
pub struct NamespaceRegistry {
    entries: RwLock<HashMap<Option<String>, Arc<NamespaceEntry>>>,
}

impl NamespaceRegistry {
    /// Create a registry holding only the default namespace.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(None, Arc::new(NamespaceEntry::new(None, GlobalHttpEvents::default())));
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Get a namespace, creating it if absent.
    pub fn get_namespace(&self, key: Option<&str>) -> Arc<NamespaceEntry> {
        let lookup = key.map(str::to_string);
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lookup)
        {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(lookup.clone()).or_insert_with(|| {
            tracing::debug!(namespace = ?lookup, "Namespace created");
            Arc::new(NamespaceEntry::new(lookup, GlobalHttpEvents::default()))
        }))
    }

    /// Set a namespace's global hooks, creating the namespace if absent.
    ///
    /// An existing namespace keeps its dispatcher and listeners.
    pub fn add_namespace(&self, key: Option<&str>, events: GlobalHttpEvents) -> Arc<NamespaceEntry> {
        let entry = self.get_namespace(key);
        entry.set_events(events);
        tracing::debug!(namespace = ?key, "Namespace events registered");
        entry
    }

    /// Clear a namespace's global hooks. Returns `false` if it never existed.
    pub fn remove_namespace_events(&self, key: Option<&str>) -> bool {
        let lookup = key.map(str::to_string);
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lookup)
            .cloned();

        entry.is_some_and(|entry| {
            entry.set_events(GlobalHttpEvents::default());
            tracing::debug!(namespace = ?key, "Namespace events removed");
            true
        })
    }

    /// Keys of all known namespaces.
    #[must_use]
    pub fn namespaces(&self) -> Vec<Option<String>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
