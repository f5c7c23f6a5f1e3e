use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Failures raised while turning a raw request into the declared input type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("request body exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("failed to read request body: {0}")]
    Read(String),
    #[error("empty request body")]
    Empty,
    #[error("failed to decode request body: {0}")]
    Decode(String),
    #[error("unknown field(s) in request body: {}", .0.join(", "))]
    UnknownFields(Vec<String>),
    #[error("invalid path parameters: {0}")]
    Path(String),
}

/// A single field-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// A domain invariant was violated, typically reported by an input transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub details: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Shortcut for a failure that concerns exactly one field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: message.clone(),
            details: vec![FieldError {
                field: field.into(),
                message,
            }],
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.details.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
        self
    }
}

/// Every failure a request can run into, from binding to rendering.
///
/// The type is `Clone` because a binding outcome is memoized per request and
/// handed back on every access to the body.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// An input transform rejected the value without classifying the failure.
    #[error("{0}")]
    Transform(Arc<anyhow::Error>),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    /// A renderer or serializer failed after the controller succeeded.
    #[error("{0}")]
    Render(String),
    #[error("{message}")]
    Status { status: StatusCode, message: String },
    /// Anything unclassified.
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        Error::Other(Arc::new(err.into()))
    }

    pub fn msg(message: impl std::fmt::Display) -> Self {
        Error::Other(Arc::new(anyhow::anyhow!("{message}")))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Error::Render(message.into())
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Status {
            status,
            message: message.into(),
        }
    }

    /// Unclassified failures coming out of an input transform are rejections of the input.
    pub(crate) fn into_transform(self) -> Self {
        match self {
            Error::Other(cause) => Error::Transform(cause),
            other => other,
        }
    }

    /// Unclassified failures while writing the response are render failures.
    pub(crate) fn into_render(self) -> Self {
        match self {
            Error::Other(cause) => Error::Render(cause.to_string()),
            other => other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::other(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::other(err)
    }
}

/// The normalized error shape written to the wire.
///
/// `status` never reaches the body; serializers only see `error` and `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[schema(as = HTTPError)]
pub struct HttpError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Human readable description of the failure.
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

impl HttpError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = details;
        self
    }
}

/// Failures while constructing or starting a server.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listen address `{0}`")]
    Address(String),
    #[error("Template Error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("SerdeJson Error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}
