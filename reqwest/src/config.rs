//! Client configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("staged-http/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`ReqwestTransportFactory`](crate::ReqwestTransportFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqwestTransportConfig {
    /// Base URL that relative request URLs are resolved against.
    pub base_url: Option<String>,
    /// TCP connect timeout. Request timeouts are set per request.
    pub connect_timeout: Option<Duration>,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for ReqwestTransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ReqwestTransportConfig {
    /// Load configuration from environment variables.
    ///
    /// - `STAGED_HTTP_BASE_URL`: base URL for relative request URLs
    /// - `STAGED_HTTP_CONNECT_TIMEOUT_MS`: connect timeout in milliseconds
    /// - `STAGED_HTTP_USER_AGENT`: `User-Agent` header
    ///
    /// Blank or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = env::var("STAGED_HTTP_BASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let connect_timeout = env::var("STAGED_HTTP_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let user_agent = env::var("STAGED_HTTP_USER_AGENT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.user_agent);

        Self {
            base_url,
            connect_timeout,
            user_agent,
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the `User-Agent`
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_user_agent_only() {
        let config = ReqwestTransportConfig::default();
        assert_eq!(config.base_url, None);
        assert_eq!(config.connect_timeout, None);
        assert!(config.user_agent.starts_with("staged-http/"));
    }

    #[test]
    fn builders_override_defaults() {
        let config = ReqwestTransportConfig::default()
            .with_base_url("http://localhost:8080/api/")
            .with_connect_timeout(Duration::from_secs(2))
            .with_user_agent("tests");

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/api/"));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.user_agent, "tests");
    }
}
