//! Error types for routing and request handling.

use thiserror::Error;

/// Router-specific errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A route pattern failed to compile at registration time.
    #[error("malformed pattern `{pattern}`: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    /// No route matched the request.
    #[error("no route matched: {method} {path}")]
    NotFound { method: String, path: String },

    /// A route matched the path but not the method.
    #[error("method not allowed: {method} for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// The request body carries a Content-Type no decoder is registered for.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The request body failed to decode as JSON.
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The request body failed to decode as XML.
    #[error("xml decode failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// The request body is not valid UTF-8 where text was required.
    #[error("body is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A handler-level failure with no more specific variant.
    #[error("handler error: {0}")]
    Handler(String),
}

impl RouterError {
    /// Creates a free-form handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
