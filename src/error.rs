use std::{fmt, sync::Arc};

use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use thiserror::Error;

use crate::{Request, Response};

/// Generic error type for the request pipeline.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef to use with the [`BoxError`] type
pub type Result<T> = std::result::Result<T, BoxError>;

/// Error type for unknown http versions
#[derive(Debug, Default, Copy, Clone)]
pub struct BadVersion;

impl fmt::Display for BadVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Unknown HTTP version")
    }
}

impl std::error::Error for BadVersion {}

/// Error type for bad header names or values
#[derive(Debug, Default, Copy, Clone)]
pub struct BadHeader;

impl fmt::Display for BadHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Error parsing header value")
    }
}

impl std::error::Error for BadHeader {}

/// Error type for unknown or unsupported HTTP methods
#[derive(Debug, Default, Copy, Clone)]
pub struct BadMethod;

impl fmt::Display for BadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Unsupported HTTP method")
    }
}

impl std::error::Error for BadMethod {}

/// Raised when header callbacks keep producing follow-up requests.
#[derive(Debug, Error)]
#[error("Could not execute request to {uri} (callback depth {depth} exceeds the limit of {max})")]
pub struct RecursionError {
    /// The uri of the request that would have been executed
    pub uri: String,
    /// The depth that was reached
    pub depth: usize,
    /// The configured maximum depth
    pub max: usize,
}

/// Configuration problems detected while assembling the pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The named cache key generator does not exist
    #[error("Cache key generator `{0}` is not callable")]
    UnknownKeyGenerator(String),
    /// The cache driver cannot be constructed
    #[error("Cache driver `{driver}` is misconfigured: {reason}")]
    Driver {
        /// Name of the driver
        driver: &'static str,
        /// What went wrong
        reason: String,
    },
}

/// An error that carries its own HTTP status, converted directly into a [`Response`].
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl HttpError {
    /// Creates an error with the given status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), headers: HeaderMap::new() }
    }

    /// Creates a redirect to `location`.
    ///
    /// Non-redirect statuses fall back to `302 Found`.
    pub fn redirect(status: StatusCode, location: &str) -> Result<Self> {
        let status =
            if status.is_redirection() { status } else { StatusCode::FOUND };
        let mut err = Self::new(status, "");
        err.headers.insert(http::header::LOCATION, location.parse()?);
        Ok(err)
    }

    /// Adds a header to the generated response.
    pub fn with_header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The status code of this error
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The message of this error
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Builds the response for this error.
    pub fn response(&self) -> Response {
        let mut response = Response::new();
        response.set_status(self.status);
        response.extend_headers(self.headers.clone());
        if !self.message.is_empty() && !self.status.is_redirection() {
            response.insert_header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            response.set_body(self.message.clone().into_bytes());
        }
        response
    }
}

/// Failures raised while resolving and running a controller.
///
/// Every variant is turned into a [`Response`] by [`DispatchError::into_response`],
/// which is the only place where that translation happens.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No controller or action answers the request
    #[error("The requested URL {uri} was not found on this server.")]
    NotFound {
        /// The uri that could not be resolved
        uri: String,
        /// The request that triggered the error
        request: Option<Arc<Request>>,
    },
    /// The controller could not be dispatched
    #[error("{0}")]
    Dispatch(String),
    /// An error with an explicit status code
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Anything else
    #[error("{0}")]
    Internal(#[source] BoxError),
}

impl DispatchError {
    /// A not found error for `request`.
    pub fn not_found(request: &Arc<Request>) -> Self {
        Self::NotFound {
            uri: request.uri().to_string(),
            request: Some(Arc::clone(request)),
        }
    }

    /// Wraps any error as an internal failure.
    pub fn internal<E: Into<BoxError>>(error: E) -> Self {
        Self::Internal(error.into())
    }

    /// The status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Http(e) => e.status(),
            Self::Dispatch(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Converts the error into a response.
    ///
    /// Internal details only reach the body when `expose` is set.
    pub fn into_response(self, expose: bool) -> Response {
        match self {
            Self::Http(e) => e.response(),
            Self::NotFound { uri, .. } => HttpError::new(
                StatusCode::NOT_FOUND,
                format!("The requested URL {uri} was not found on this server."),
            )
            .response(),
            other => {
                let status = other.status();
                let message = if expose {
                    error_text(&other)
                } else {
                    status
                        .canonical_reason()
                        .unwrap_or("Internal Server Error")
                        .to_string()
                };
                HttpError::new(status, message).response()
            }
        }
    }
}

impl From<BoxError> for DispatchError {
    fn from(error: BoxError) -> Self {
        Self::Internal(error)
    }
}

/// Renders an error and its sources as `Kind [ status ]: message ~ cause`.
pub(crate) fn error_text(error: &DispatchError) -> String {
    let kind = match error {
        DispatchError::NotFound { .. } => "NotFound",
        DispatchError::Dispatch(_) => "DispatchError",
        DispatchError::Http(_) => "HttpError",
        DispatchError::Internal(_) => "InternalError",
    };
    let mut text =
        format!("{kind} [ {} ]: {error}", error.status().as_u16());
    let mut source = match error {
        DispatchError::Internal(inner) => std::error::Error::source(&**inner),
        other => std::error::Error::source(other),
    };
    while let Some(cause) = source {
        text.push_str(" ~ ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
