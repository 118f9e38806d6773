//! Request args: the validated description of one HTTP request.
//!
//! [`HttpRequestArgs`] is built by the caller, handed to the manager, and
//! moved into the request's pipeline. Every setter validates its input at
//! assignment, so a request that was constructed successfully can always be
//! submitted.
//!
//! # Building requests
//!
//! ```
//! use staged_http_core::HttpRequestArgs;
//! use serde_json::json;
//!
//! let args = HttpRequestArgs::post("/orders")
//!     .with_content_type("application/json")?
//!     .with_body(serde_json::to_vec(&json!({"sku": "A-1"})).unwrap_or_default())
//!     .with_namespace("orders")
//!     .with_context(json!({"attempt": 1}));
//!
//! assert_eq!(args.namespace(), Some("orders"));
//! # Ok::<(), staged_http_core::ValidationError>(())
//! ```
//!
//! # Loosely typed descriptions
//!
//! [`HttpRequestArgs::from_json`] accepts the JSON shape used by browser
//! style clients (`url`, `method`, `headers: [{key, value}]`, `contentType`,
//! `withCredentials`, `responseType`, `timeout` in milliseconds, `context`,
//! `namespace`). Each present field is type checked.

use crate::error::ValidationError;
use crate::event::{HttpEventArgs, HttpStage};
use crate::response::ResponseType;
use crate::BoxError;
use crate::completed::CompletedHttpRequest;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result returned by hooks. Errors are routed like transport failures.
pub type HookResult = Result<(), BoxError>;

/// Lifecycle hook.
pub type HttpHook = Arc<dyn Fn(&mut HttpEventArgs) -> HookResult + Send + Sync>;

/// Namespace hook invoked once per completed batch.
pub type AllCompleteHook = Arc<dyn Fn(&[CompletedHttpRequest]) -> HookResult + Send + Sync>;

/// Header name: text or a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderKey {
    /// Textual name.
    Text(String),
    /// Numeric name, rendered as its decimal form.
    Number(Number),
}

impl fmt::Display for HeaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for HeaderKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for HeaderKey {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// Header value: text, a number or a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Textual value.
    Text(String),
    /// Numeric value.
    Number(Number),
    /// Boolean value, rendered as `true`/`false`.
    Bool(bool),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
            Self::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for HeaderValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One request header. Duplicates are allowed and order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestHeader {
    key: HeaderKey,
    value: HeaderValue,
}

impl HttpRequestHeader {
    /// Create a header.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidHeaderName`] when the name is not a
    /// token and [`ValidationError::InvalidHeaderValue`] when the value holds
    /// a line break or NUL.
    pub fn new(key: impl Into<HeaderKey>, value: impl Into<HeaderValue>) -> Result<Self, ValidationError> {
        let key = key.into();
        let value = value.into();

        let name = key.to_string();
        if !is_token(&name) {
            return Err(ValidationError::InvalidHeaderName(name));
        }
        if has_forbidden_chars(&value.to_string()) {
            return Err(ValidationError::InvalidHeaderValue { name });
        }

        Ok(Self { key, value })
    }

    /// Header name as given.
    #[must_use]
    pub const fn key(&self) -> &HeaderKey {
        &self.key
    }

    /// Header value as given.
    #[must_use]
    pub const fn value(&self) -> &HeaderValue {
        &self.value
    }

    /// Rendered `(name, value)` pair for a transport.
    #[must_use]
    pub fn to_pair(&self) -> (String, String) {
        (self.key.to_string(), self.value.to_string())
    }

    fn from_json(entry: &Value) -> Option<Self> {
        let object = entry.as_object()?;
        let key = match object.get("key")? {
            Value::String(text) => HeaderKey::Text(text.clone()),
            Value::Number(number) => HeaderKey::Number(number.clone()),
            _ => return None,
        };
        let value = match object.get("value")? {
            Value::String(text) => HeaderValue::Text(text.clone()),
            Value::Number(number) => HeaderValue::Number(number.clone()),
            Value::Bool(flag) => HeaderValue::Bool(*flag),
            _ => return None,
        };
        Self::new(key, value).ok()
    }
}

/// Validated description of one request.
///
/// Cloning is cheap for hooks (they are reference counted); the body is
/// copied.
#[derive(Clone)]
pub struct HttpRequestArgs {
    url: Option<String>,
    method: Option<String>,
    headers: Vec<HttpRequestHeader>,
    body: Option<Vec<u8>>,
    content_type: Option<String>,
    with_credentials: bool,
    response_type: ResponseType,
    timeout: Option<Duration>,
    context: Value,
    namespace: Option<String>,
    on_before_send: Option<HttpHook>,
    on_success: Option<HttpHook>,
    on_error: Option<HttpHook>,
    on_complete: Option<HttpHook>,
}

impl Default for HttpRequestArgs {
    fn default() -> Self {
        Self {
            url: None,
            method: None,
            headers: Vec::new(),
            body: None,
            content_type: None,
            with_credentials: false,
            response_type: ResponseType::Unknown,
            timeout: None,
            context: Value::Object(Map::new()),
            namespace: None,
            on_before_send: None,
            on_success: None,
            on_error: None,
            on_complete: None,
        }
    }
}

impl HttpRequestArgs {
    /// Empty request args.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A `GET` request for `url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::with_known_method(url, "GET")
    }

    /// A `POST` request for `url`.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::with_known_method(url, "POST")
    }

    fn with_known_method(url: impl Into<String>, method: &'static str) -> Self {
        Self {
            url: Some(url.into()),
            method: Some(method.to_string()),
            ..Self::default()
        }
    }

    /// Decode a loosely typed request description.
    ///
    /// `null` fields count as absent and unknown fields are ignored. Header
    /// entries that are not `{key, value}` objects with valid types are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NotAnObject`] for non-objects and a
    /// field-specific error when a present field has the wrong type.
    pub fn from_json(description: &Value) -> Result<Self, ValidationError> {
        let Value::Object(fields) = description else {
            return Err(ValidationError::NotAnObject);
        };

        let present = |name: &str| present_field(fields, name);
        let mut args = Self::default();

        if let Some(url) = present("url") {
            args.url = Some(expect_string(url, "url")?.to_string());
        }
        if let Some(method) = present("method") {
            args.set_method(Some(expect_string(method, "method")?))?;
        }
        if let Some(headers) = present("headers") {
            let Value::Array(entries) = headers else {
                return Err(ValidationError::WrongType {
                    field: "headers",
                    expected: "an array",
                });
            };
            for entry in entries {
                match HttpRequestHeader::from_json(entry) {
                    Some(header) => args.headers.push(header),
                    None => tracing::warn!(entry = %entry, "Skipping invalid header entry"),
                }
            }
        }
        if let Some(body) = present("body") {
            args.body = Some(match body {
                Value::String(text) => text.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            });
        }
        if let Some(content_type) = present("contentType") {
            args.set_content_type(Some(expect_string(content_type, "contentType")?))?;
        }
        if let Some(with_credentials) = present("withCredentials") {
            args.with_credentials = with_credentials.as_bool().ok_or(ValidationError::WrongType {
                field: "withCredentials",
                expected: "a boolean",
            })?;
        }
        if let Some(response_type) = present("responseType") {
            args.response_type = expect_string(response_type, "responseType")?.parse()?;
        }
        if let Some(timeout) = present("timeout") {
            let millis = timeout.as_f64().ok_or(ValidationError::WrongType {
                field: "timeout",
                expected: "a number",
            })?;
            args.timeout = timeout_from_millis(millis)?;
        }
        if let Some(context) = present("context") {
            args.context = context.clone();
        }
        if let Some(namespace) = present("namespace") {
            args.namespace = Some(expect_string(namespace, "namespace")?.to_string());
        }

        Ok(args)
    }

    // ========== Accessors ==========

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[HttpRequestHeader] {
        &self.headers
    }

    /// Request body.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Content type.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether credentials are sent.
    #[must_use]
    pub const fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    /// Response decoding hint.
    #[must_use]
    pub const fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Timeout. `None` means no timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Carried context. Defaults to an empty JSON object.
    #[must_use]
    pub const fn context(&self) -> &Value {
        &self.context
    }

    /// Mutable carried context.
    pub const fn context_mut(&mut self) -> &mut Value {
        &mut self.context
    }

    /// Namespace key. `None` is the default namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The local hook for a hook stage.
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

    // ========== Setters ==========

    /// Set the URL.
    pub fn set_url(&mut self, url: Option<String>) {
        self.url = url;
    }

    /// Set the method.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidMethod`] if the method is not a token.
    pub fn set_method(&mut self, method: Option<&str>) -> Result<(), ValidationError> {
        if let Some(method) = method {
            if !is_token(method) {
                return Err(ValidationError::InvalidMethod(method.to_string()));
            }
        }
        self.method = method.map(str::to_string);
        Ok(())
    }

    /// Replace all headers.
    pub fn set_headers(&mut self, headers: Vec<HttpRequestHeader>) {
        self.headers = headers;
    }

    /// Append a validated header.
    pub fn push_header(&mut self, header: HttpRequestHeader) {
        self.headers.push(header);
    }

    /// Set the body.
    pub fn set_body(&mut self, body: Option<Vec<u8>>) {
        self.body = body;
    }

    /// Set the content type.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidContentType`] for values holding a
    /// line break or NUL.
    pub fn set_content_type(&mut self, content_type: Option<&str>) -> Result<(), ValidationError> {
        if content_type.is_some_and(has_forbidden_chars) {
            return Err(ValidationError::InvalidContentType);
        }
        self.content_type = content_type.map(str::to_string);
        Ok(())
    }

    /// Set whether credentials are sent.
    pub const fn set_with_credentials(&mut self, with_credentials: bool) {
        self.with_credentials = with_credentials;
    }

    /// Set the response decoding hint.
    pub const fn set_response_type(&mut self, response_type: ResponseType) {
        self.response_type = response_type;
    }

    /// Set the timeout. A zero duration disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout.filter(|timeout| !timeout.is_zero());
    }

    /// Replace the carried context.
    pub fn set_context(&mut self, context: Value) {
        self.context = context;
    }

    /// Set the namespace key.
    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    /// Set or clear the local hook of a hook stage. Other stages are ignored.
    pub fn set_hook(&mut self, stage: HttpStage, hook: Option<HttpHook>) {
        match stage {
            HttpStage::BeforeSend => self.on_before_send = hook,
            HttpStage::Success => self.on_success = hook,
            HttpStage::Error => self.on_error = hook,
            HttpStage::Complete => self.on_complete = hook,
            _ => {}
        }
    }

    // ========== Builders ==========

    /// Set the URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the method.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidMethod`] if the method is not a token.
    pub fn with_method(mut self, method: &str) -> Result<Self, ValidationError> {
        self.set_method(Some(method))?;
        Ok(self)
    }

    /// Append a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is invalid.
    pub fn with_header(
        mut self,
        key: impl Into<HeaderKey>,
        value: impl Into<HeaderValue>,
    ) -> Result<Self, ValidationError> {
        self.headers.push(HttpRequestHeader::new(key, value)?);
        Ok(self)
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the content type.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidContentType`] for invalid values.
    pub fn with_content_type(mut self, content_type: &str) -> Result<Self, ValidationError> {
        self.set_content_type(Some(content_type))?;
        Ok(self)
    }

    /// Send credentials with the request.
    #[must_use]
    pub const fn include_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    /// Set the response decoding hint.
    #[must_use]
    pub const fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the timeout. A zero duration disables it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(Some(timeout));
        self
    }

    /// Set the carried context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Run the request in a namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Hook invoked before the transport is opened.
    #[must_use]
    pub fn on_before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_before_send = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when a success response arrives.
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when the request fails.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Hook invoked once the request is finished, whatever the outcome.
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpEventArgs) -> HookResult + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for HttpRequestArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequestArgs")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("content_type", &self.content_type)
            .field("with_credentials", &self.with_credentials)
            .field("response_type", &self.response_type)
            .field("timeout", &self.timeout)
            .field("context", &self.context)
            .field("namespace", &self.namespace)
            .field("on_before_send", &self.on_before_send.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

fn present_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|value| !value.is_null())
}

fn expect_string<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    value.as_str().ok_or(ValidationError::WrongType {
        field,
        expected: "a string",
    })
}

fn timeout_from_millis(millis: f64) -> Result<Option<Duration>, ValidationError> {
    if !millis.is_finite() || millis < 0.0 {
        return Err(ValidationError::NegativeTimeout(millis.to_string()));
    }
    if millis == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(millis / 1000.0)
        .map(Some)
        .map_err(|_| ValidationError::TimeoutTooLarge(millis.to_string()))
}

// RFC 7230 token
fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn has_forbidden_chars(value: &str) -> bool {
    value.contains(['\r', '\n', '\0'])
}
