//! Manager configuration.
//!
//! Loaded from code via builders or from environment variables with
//! defaults for anything unset.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration for an [`HttpManager`](crate::HttpManager).
///
/// # Example
///
/// ```
/// use staged_http_runtime::HttpManagerConfig;
/// use std::time::Duration;
///
/// let config = HttpManagerConfig::default().with_default_timeout(Duration::from_secs(10));
/// assert_eq!(config.default_timeout, Some(Duration::from_secs(10)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpManagerConfig {
    /// Timeout applied to requests that don't set one. `None` means no timeout.
    pub default_timeout: Option<Duration>,
    /// Stop a request's pipeline when a hook fails instead of routing the
    /// failure to completion. Requests still finish their batch accounting.
    pub end_on_handler_crash: bool,
}

impl HttpManagerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `STAGED_HTTP_DEFAULT_TIMEOUT_MS`: default timeout in milliseconds,
    ///   `0` or unset for none. Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let default_timeout = env::var("STAGED_HTTP_DEFAULT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self {
            default_timeout,
            ..Self::default()
        }
    }

    /// Set the default timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set whether a failing hook ends the pipeline
    #[must_use]
    pub const fn with_end_on_handler_crash(mut self, end: bool) -> Self {
        self.end_on_handler_crash = end;
        self
    }
}
