//! # Staged HTTP Runtime
//!
//! Runtime for staged HTTP requests: a resumable step pipeline, per-namespace
//! hook registries and the orchestrator that drives every request through
//! its lifecycle.
//!
//! ## Core Components
//!
//! - **Pipeline**: keyed steps with forward seek, pause/resume and crash routing
//! - **`HttpManager`**: builds one pipeline per request and tracks active requests
//! - **Namespaces**: global hooks, bubbling listeners and batch completion
//!
//! ## Example
//!
//! ```ignore
//! use staged_http_core::HttpRequestArgs;
//! use staged_http_runtime::{GlobalHttpEvents, HttpManager};
//!
//! let manager = HttpManager::new(transports);
//! manager.add_namespace(
//!     Some("catalog"),
//!     GlobalHttpEvents::new().on_all_complete(|batch| {
//!         tracing::info!(size = batch.len(), "catalog refreshed");
//!         Ok(())
//!     }),
//! );
//!
//! let first = manager.execute_request_async(HttpRequestArgs::get("/products").with_namespace("catalog"));
//! let second = manager.execute_request_async(HttpRequestArgs::get("/prices").with_namespace("catalog"));
//! let (first, second) = futures::join!(first, second);
//! ```

/// Keyed, resumable step pipeline
pub mod pipeline;

/// Request orchestrator
pub mod manager;

/// Namespace registry and global hooks
pub mod namespace;

/// Per-namespace listener dispatch
pub mod bubbling;

/// Active-request and batch bookkeeping
pub mod batch;

/// Runtime configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

pub use batch::BatchLedger;
pub use bubbling::{BubblingEvents, ListenerHandle, ListenerOptions};
pub use config::HttpManagerConfig;
pub use manager::{HttpManager, HttpRequestInstance};
pub use metrics::{MetricsError, MetricsServer};
pub use namespace::{GlobalHttpEvents, NamespaceEntry, NamespaceRegistry};
pub use pipeline::{
    Continuation, JobFuture, Pipeline, PipelineController, PipelineError, PipelineStatus, Step,
    StepAction, StepContext,
};
