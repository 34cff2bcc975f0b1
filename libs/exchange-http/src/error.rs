use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::codec::Direction;
use crate::config::ConfigError;

/// Boxed error used for opaque causes (transport failures, codec errors,
/// interceptor-mapped errors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maximum number of body bytes rendered by [`HttpFailure`]'s `Display`.
pub const BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Errors detected while compiling a method declaration into a
/// [`RequestTemplate`](crate::RequestTemplate).
///
/// These are fatal at proxy-build time and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("method `{method}`: path placeholder `{placeholder}` has no bound path parameter")]
    UnboundPlaceholder { method: String, placeholder: String },

    #[error("method `{method}`: path parameter `{param}` does not match any placeholder")]
    UnknownPathParameter { method: String, param: String },

    #[error("method `{method}`: placeholder `{param}` is bound by more than one path parameter")]
    DuplicatePathBinding { method: String, param: String },

    #[error("method `{method}`: placeholder `{placeholder}` appears more than once in the path")]
    DuplicatePlaceholder { method: String, placeholder: String },

    #[error("method `{method}`: at most one body parameter is allowed, found `{first}` and `{second}`")]
    MultipleBodies {
        method: String,
        first: String,
        second: String,
    },

    #[error("method `{method}`: malformed path `{path}`: {reason}")]
    MalformedPath {
        method: String,
        path: String,
        reason: String,
    },

    #[error("method `{method}`: parameter #{index} has an empty name")]
    EmptyName { method: String, index: usize },

    #[error("method `{method}`: invalid declared header `{name}`")]
    InvalidHeader { method: String, name: String },

    #[error("service `{service}` declares method `{method}` more than once")]
    DuplicateMethod { service: String, method: String },

    #[error("service `{service}` method `{method}` conflicts with an earlier declaration under the same name")]
    ConflictingDefinition { service: String, method: String },
}

/// A non-2xx HTTP response captured by the error classification link.
#[derive(Debug, Clone)]
pub struct HttpFailure {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
    /// Error payload decoded from a JSON body, when the body was JSON.
    pub payload: Option<serde_json::Value>,
}

impl HttpFailure {
    /// Lossy UTF-8 rendering of at most [`BODY_PREVIEW_LIMIT`] body bytes.
    #[must_use]
    pub fn body_preview(&self) -> String {
        let end = self.body.len().min(BODY_PREVIEW_LIMIT);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }

    /// Deserialize the attached error payload into a caller-defined shape.
    #[must_use]
    pub fn payload_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "HTTP {}", self.status)
        } else {
            write!(f, "HTTP {}: {}", self.status, self.body_preview())
        }
    }
}

/// Errors produced by the exchange engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// Bad interface declaration.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// No resolver claimed a parameter, or a required value was absent.
    #[error("method `{method}`: no argument resolver handled parameter `{param}`")]
    UnresolvedArgument { method: String, param: String },

    #[error("service `{service}` has no method `{method}`")]
    UnknownMethod { service: String, method: String },

    #[error("method `{method}` takes {expected} argument(s), got {actual}")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("method `{method}` returns `{declared}`, caller asked for `{requested}`")]
    ResponseTypeMismatch {
        method: String,
        declared: &'static str,
        requested: &'static str,
    },

    /// No usable grant exists and none can be silently acquired.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Token fetch or refresh failed after bounded retries.
    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),

    /// 4xx response.
    #[error("client error: {0}")]
    ClientError(Box<HttpFailure>),

    /// 5xx response.
    #[error("server error: {0}")]
    ServerError(Box<HttpFailure>),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server responded but the body could not be understood.
    #[error("failed to decode response as `{value_type}` ({media_type}): {source}")]
    Decode {
        value_type: &'static str,
        media_type: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] BoxError),

    #[error("no codec for {direction} `{value_type}` as any of [{candidates}]")]
    CodecNotFound {
        direction: Direction,
        value_type: &'static str,
        candidates: String,
    },

    #[error("invocation cancelled")]
    Cancelled,

    /// Error produced by an interceptor that remapped an outcome.
    #[error(transparent)]
    Mapped(BoxError),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExchangeError {
    /// Wrap a caller-defined error produced by an interceptor.
    pub fn mapped(err: impl Into<BoxError>) -> Self {
        Self::Mapped(err.into())
    }

    /// `true` for connection and timeout failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// HTTP status of a classified response error.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ClientError(f) | Self::ServerError(f) => Some(f.status),
            _ => None,
        }
    }
}
