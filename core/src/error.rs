//! Error taxonomy for loads and handled responses.
//!
//! # Design
//! Every way a request can end badly maps to one `LoadError` variant. Errors
//! are values stored inside an `Outcome` or passed to `on_failure`; they never
//! cross the loader boundary as `Err`. `TransportFailure` keeps the status code
//! and partial body the transport saw, so callers can still show or log them.

use thiserror::Error;

const PARSING_FAILED_MESSAGE: &str = "Failure while parsing JSON";
const NOT_IMPLEMENTED_MESSAGE: &str = "Parsing not implemented for this response schema";

/// Failure reported by a transport.
///
/// `status` is set when the server answered with a non-success status;
/// `body` carries whatever part of the response body was read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
    pub message: String,
    pub status: Option<u16>,
    pub body: Option<String>,
}

impl TransportError {
    /// An I/O-level failure with no response at all.
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// The server answered, but with a status the transport treats as failure.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            message: format!("HTTP {status}"),
            status: Some(status),
            body: Some(body.into()),
        }
    }
}

/// Malformed payload, carrying the JSON mapper's diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Classified reason a load did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{}", .0.message)]
    Decode(#[from] DecodeError),

    /// Well-formed response that decoded to no usable value.
    #[error("{}", PARSING_FAILED_MESSAGE)]
    ParsingFailed,

    /// The decode strategy produced no response object at all.
    #[error("{}", NOT_IMPLEMENTED_MESSAGE)]
    ParsingNotImplemented,
}

/// Tag of a `LoadError`, for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportFailure,
    DecodeSyntaxError,
    ParsingFailed,
    ParsingNotImplemented,
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Transport(_) => ErrorKind::TransportFailure,
            LoadError::Decode(_) => ErrorKind::DecodeSyntaxError,
            LoadError::ParsingFailed => ErrorKind::ParsingFailed,
            LoadError::ParsingNotImplemented => ErrorKind::ParsingNotImplemented,
        }
    }
}
