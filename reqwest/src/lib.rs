//! # Staged HTTP over reqwest
//!
//! Production [`Transport`](staged_http_core::Transport) for the staged HTTP
//! runtime, backed by a shared [`reqwest::Client`].
//!
//! ## Example
//!
//! ```ignore
//! use staged_http_reqwest::{ReqwestTransportConfig, ReqwestTransportFactory};
//! use staged_http_runtime::HttpManager;
//!
//! let factory = ReqwestTransportFactory::new(&ReqwestTransportConfig::from_env())?;
//! let manager = HttpManager::new(factory);
//! ```

/// Client configuration
pub mod config;

/// Transport implementation
pub mod transport;

pub use config::{DEFAULT_USER_AGENT, ReqwestTransportConfig};
pub use transport::{ReqwestTransport, ReqwestTransportFactory};
