// Error types for request binding

use crate::ContentTypeKind;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Boxed cause carried by decoders and bind hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure classifications raised by the decoding and binding machinery.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bind: unsupported content type")]
    UnsupportedContentType(ContentTypeKind),

    #[error("max recursion depth ({0}) exceeded")]
    RecursionLimit(usize),

    #[error("bind: {0}")]
    InvalidArgument(String),

    #[error("multipart: {0}")]
    Multipart(String),

    #[error("bind: form body too large")]
    FormTooLarge,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::DeError),

    #[error(transparent)]
    Form(#[from] serde_urlencoded::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnsupportedContentType(_) => 415,
            Error::FormTooLarge => 413,
            _ => 400,
        }
    }
}

// ============================================================================
// Bind Error
// ============================================================================

/// A binding failure, optionally pinned to the field path where it happened.
///
/// Renders as `bind failed on field '<path>': <cause>` or, at the root,
/// `bind failed: <cause>`.
#[derive(Debug)]
pub struct BindError {
    /// Dot-joined member path from the root value, empty at the root.
    pub field: String,
    source: BoxError,
}

impl BindError {
    /// Root-level error.
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self::at("", cause)
    }

    /// Error at `field`.
    ///
    /// A cause that already is a `BindError` is returned unchanged so its
    /// fully-qualified path is kept and the message is not prefixed twice.
    pub fn at(field: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        match cause.downcast::<BindError>() {
            Ok(inner) => *inner,
            Err(cause) => Self {
                field: field.into(),
                source: cause,
            },
        }
    }

    /// The wrapped cause.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub fn into_cause(self) -> BoxError {
        self.source
    }

    /// Downcast the cause to a concrete error type.
    pub fn cause_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// The machinery classification of the cause, if it has one.
    pub fn kind(&self) -> Option<&Error> {
        self.cause_as::<Error>()
    }

    pub fn is_recursion_limit(&self) -> bool {
        matches!(self.kind(), Some(Error::RecursionLimit(_)))
    }

    pub fn is_unsupported_content_type(&self) -> bool {
        matches!(self.kind(), Some(Error::UnsupportedContentType(_)))
    }

    /// HTTP status to answer with when this error reaches the client.
    pub fn status_code(&self) -> u16 {
        self.kind().map(Error::status_code).unwrap_or(400)
    }

    /// `{"error":"<message>"}`
    pub fn to_json(&self) -> Vec<u8> {
        error_to_json(Some(self))
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "bind failed: {}", self.source)
        } else {
            write!(f, "bind failed on field '{}': {}", self.field, self.source)
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<Error> for BindError {
    fn from(err: Error) -> Self {
        Self::new(err)
    }
}

// ============================================================================
// Client-facing conversions
// ============================================================================

/// Serialize an error as `{"error":"<message>"}`.
///
/// `None` produces `{"error":""}` rather than dropping the key.
pub fn error_to_json(err: Option<&dyn std::error::Error>) -> Vec<u8> {
    serde_json::to_vec(&error_to_map(err))
        .unwrap_or_else(|_| br#"{"error":"failed to marshal error message"}"#.to_vec())
}

/// Convert an error into a single-entry `{"error": "<message>"}` map.
pub fn error_to_map(err: Option<&dyn std::error::Error>) -> HashMap<String, String> {
    let message = err.map(|e| e.to_string()).unwrap_or_default();
    HashMap::from([("error".to_string(), message)])
}
