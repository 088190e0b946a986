//! The error taxonomy of the routing layer.
//!
//! Every failure raised while a request is routed ends up as a [`RouteError`]. The router
//! catches it at its dispatch boundary and renders it through [`crate::error_page`].

use crate::body::BoxError;
use crate::error_page::ErrorContentType;
use http::{HeaderMap, StatusCode};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Not Found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("internal error: {source}")]
    Internal { source: BoxError },
}

impl RouteError {
    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::Internal { source: source.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::NotFound => StatusCode::NOT_FOUND,
            RouteError::Unauthorized => StatusCode::UNAUTHORIZED,
            RouteError::Http(e) => e.status,
            RouteError::Io { source } if source.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            RouteError::Io { .. } | RouteError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message may be shown to the client.
    pub fn expose(&self) -> bool {
        match self {
            RouteError::Http(e) => e.expose,
            _ => self.status().as_u16() < 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RouteError::Http(e) => e.message.clone(),
            RouteError::Io { source } if source.kind() == io::ErrorKind::NotFound => "Not Found".to_string(),
            other => other.to_string(),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            RouteError::Http(e) => e.detail.as_deref(),
            _ => None,
        }
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            RouteError::Http(e) if !e.headers.is_empty() => Some(&e.headers),
            _ => None,
        }
    }

    pub fn content_types(&self) -> &[ErrorContentType] {
        match self {
            RouteError::Http(e) => &e.content_types,
            _ => &[],
        }
    }
}

impl From<BoxError> for RouteError {
    fn from(source: BoxError) -> Self {
        match source.downcast::<HttpError>() {
            Ok(http) => RouteError::Http(*http),
            Err(source) => match source.downcast::<io::Error>() {
                Ok(io) => RouteError::Io { source: *io },
                Err(source) => RouteError::Internal { source },
            },
        }
    }
}

/// An error carrying its own HTTP status and presentation details.
///
/// ```
/// use http::StatusCode;
/// use micro_router::HttpError;
///
/// let err = HttpError::new(StatusCode::CONFLICT, "user exists").with_detail("name: alice");
/// assert!(err.expose());
/// ```
#[derive(Error, Debug)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
    expose: bool,
    headers: HeaderMap,
    content_types: Vec<ErrorContentType>,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
            expose: status.as_u16() < 500,
            headers: HeaderMap::new(),
            content_types: Vec::new(),
            source: None,
        }
    }

    /// Uses the canonical reason phrase as message.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or("Unknown Error"))
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Forces the rendered representation to one of the given types.
    #[must_use]
    pub fn with_content_types(mut self, content_types: impl IntoIterator<Item = ErrorContentType>) -> Self {
        self.content_types = content_types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn expose(&self) -> bool {
        self.expose
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
