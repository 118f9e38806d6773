//! Response type hints and decoded response bodies.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hint telling the transport how to decode the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// No hint; the body is decoded as text.
    #[default]
    Unknown,
    /// Raw bytes.
    Blob,
    /// Raw bytes.
    ArrayBuffer,
    /// Markup, kept as document text.
    Xml,
    /// Markup, kept as document text.
    Html,
    /// Plain text.
    Text,
    /// Parsed JSON.
    Json,
    /// Markup, kept as document text.
    Document,
}

impl ResponseType {
    /// Lowercase name of the hint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Blob => "blob",
            Self::ArrayBuffer => "arraybuffer",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Text => "text",
            Self::Json => "json",
            Self::Document => "document",
        }
    }

    /// The hint handed to a transport.
    ///
    /// Markup hints collapse into [`ResponseType::Document`]; `Unknown` means
    /// the transport keeps its own default.
    #[must_use]
    pub const fn transport_hint(self) -> Option<Self> {
        match self {
            Self::Unknown => None,
            Self::Xml | Self::Html | Self::Document => Some(Self::Document),
            other => Some(other),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unknown" => Ok(Self::Unknown),
            "blob" => Ok(Self::Blob),
            "arraybuffer" => Ok(Self::ArrayBuffer),
            "xml" => Ok(Self::Xml),
            "html" => Ok(Self::Html),
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "document" => Ok(Self::Document),
            _ => Err(ValidationError::UnknownResponseType(s.to_string())),
        }
    }
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ResponseBody {
    /// UTF-8 text (lossy).
    Text(String),
    /// Parsed JSON.
    Json(serde_json::Value),
    /// Raw bytes for `blob` and `arraybuffer`.
    Bytes(Vec<u8>),
    /// Markup text for `xml`, `html` and `document`.
    Document(String),
}

impl ResponseBody {
    /// Decode raw bytes according to a response type hint.
    ///
    /// Returns `None` when the hint is `json` and the body is not valid JSON,
    /// which leaves the response empty rather than failing the request.
    #[must_use]
    pub fn decode(response_type: ResponseType, bytes: &[u8]) -> Option<Self> {
        match response_type {
            ResponseType::Unknown | ResponseType::Text => {
                Some(Self::Text(String::from_utf8_lossy(bytes).into_owned()))
            }
            ResponseType::Json => serde_json::from_slice(bytes).ok().map(Self::Json),
            ResponseType::Blob | ResponseType::ArrayBuffer => Some(Self::Bytes(bytes.to_vec())),
            ResponseType::Xml | ResponseType::Html | ResponseType::Document => {
                Some(Self::Document(String::from_utf8_lossy(bytes).into_owned()))
            }
        }
    }

    /// Text view of the body, if it is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Document(text) => Some(text),
            Self::Json(_) | Self::Bytes(_) => None,
        }
    }

    /// JSON view of the body, if it was parsed.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}
