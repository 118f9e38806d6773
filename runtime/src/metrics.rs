//! Request, batch and pipeline metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, e.g. with [`MetricsServer::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! use staged_http_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use staged_http_core::HttpRequestStatus;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The bucket layout was rejected.
    #[error("Invalid histogram buckets: {0}")]
    Build(String),
    /// The global recorder could not be installed.
    #[error("Could not install Prometheus recorder: {0}")]
    Install(String),
}

const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0];

/// Prometheus exposition for the request runtime.
///
/// Installs a global Prometheus recorder and renders the exposition text.
/// Serving the text over HTTP is left to the embedding application, which
/// is expected to do so on [`addr`](Self::addr).
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

impl MetricsServer {
    /// Exporter for the given scrape address. Nothing is installed yet.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// A recorder installed earlier (by another server or a test) is left in
    /// place; this server then has no handle and [`render`](Self::render)
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] for an invalid bucket layout and
    /// [`MetricsError::Install`] if installation fails for another reason.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)
            .and_then(|builder| {
                builder.set_buckets_for_metric(Matcher::Full("http_batch_size".to_string()), BATCH_SIZE_BUCKETS)
            })
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!(addr = %self.addr, "Prometheus recorder installed");
                self.handle = Some(handle);
                Ok(())
            }
            Err(BuildError::FailedToSetGlobalRecorder(_)) => {
                tracing::warn!(addr = %self.addr, "A metrics recorder is already installed");
                Ok(())
            }
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle of the recorder this server installed.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current exposition text, if this server installed the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Request metrics
    describe_counter!(
        "http_requests_submitted_total",
        "Total number of requests submitted to the manager"
    );
    describe_counter!(
        "http_requests_completed_total",
        "Total number of requests that reached completion, by final status"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        "Time from submission to completion"
    );
    describe_counter!(
        "http_handler_crashes_total",
        "Total number of hooks or steps that failed or panicked"
    );

    // Batch metrics
    describe_counter!(
        "http_batches_completed_total",
        "Total number of namespace batches emitted"
    );
    describe_histogram!("http_batch_size", "Number of requests per emitted batch");

    // Pipeline metrics
    describe_counter!(
        "pipeline_seeks_total",
        "Total number of forward seeks performed by pipelines"
    );
}

/// Request metrics recorder.
pub struct HttpMetrics;

impl HttpMetrics {
    /// Record a submitted request.
    pub fn record_submitted() {
        counter!("http_requests_submitted_total").increment(1);
    }

    /// Record a completed request.
    pub fn record_completed(status: HttpRequestStatus, duration: Duration) {
        counter!("http_requests_completed_total", "status" => status.as_str()).increment(1);
        histogram!("http_request_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a crashed hook or step.
    pub fn record_handler_crash(step_key: &'static str) {
        counter!("http_handler_crashes_total", "step" => step_key).increment(1);
    }
}

/// Batch metrics recorder.
pub struct BatchMetrics;

impl BatchMetrics {
    /// Record an emitted batch.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_batch(size: usize) {
        counter!("http_batches_completed_total").increment(1);
        histogram!("http_batch_size").record(size as f64);
    }
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a forward seek.
    pub fn record_seek() {
        counter!("pipeline_seeks_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_debug_hides_handle() {
        let server = MetricsServer::new("127.0.0.1:9000".parse().unwrap());
        let rendered = format!("{server:?}");
        assert_eq!(rendered, "MetricsServer { addr: 127.0.0.1:9000, has_handle: false }");
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // handle might be None if another test already installed the recorder
    }

    #[tokio::test]
    async fn test_request_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        HttpMetrics::record_submitted();
        HttpMetrics::record_completed(HttpRequestStatus::Complete, Duration::from_millis(20));
        BatchMetrics::record_batch(3);
        PipelineMetrics::record_seek();

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("http_requests_submitted_total"));
            assert!(rendered.contains("http_requests_completed_total"));
            assert!(rendered.contains("http_batches_completed_total"));
            assert!(rendered.contains("pipeline_seeks_total"));
        }
    }
}
