use http::StatusCode;
use thiserror::Error;

use crate::transport::HttpError;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide error type.
///
/// The retrying transport only ever retries [`Error::Server`] and
/// [`Error::Network`]; every other variant propagates to the caller
/// immediately.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed credential/config material. Raised at
    /// construction, never at sign-time, and never retried.
    #[error("invalid configuration: {message}")]
    Config { message: String },
    /// The server rejected the signature (401/403).
    #[error("authentication rejected, status {status}: {body}")]
    Authentication { status: StatusCode, body: String },
    /// 404 on a single-resource read. Read operations translate this to an
    /// absent result instead of surfacing it.
    #[error("resource not found")]
    NotFound,
    /// 5xx response, surfaced with the last status after retries ran out.
    #[error("server error after {attempts} attempt(s), status {status}: {body}")]
    Server {
        status: StatusCode,
        body: String,
        attempts: usize,
    },
    /// Timeout, connection reset or other transport-level failure, surfaced
    /// after retries ran out.
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        #[source]
        source: HttpError,
        attempts: usize,
    },
    /// A required field was absent from a vendor response (no upload id, an
    /// unparseable ack range, ...). Terminal: retrying reproduces it.
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// Terminal non-auth 4xx.
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Other(#[from] BoxedError),
}

/// What a caller can safely do after an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The whole operation may be re-run as-is.
    RetryOperation,
    /// An upload session survives; resume from the last committed offset or
    /// re-send the failed part.
    ResumeUpload,
    /// Restart from scratch.
    Fatal,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Classify this error for the caller. Upload coordinators upgrade
    /// `RetryOperation` to [`Recovery::ResumeUpload`] while their session is
    /// still live.
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Server { .. } | Error::Network { .. } => Recovery::RetryOperation,
            _ => Recovery::Fatal,
        }
    }
}
