//! Error handling for trackfill.
//!
//! Provides a unified error type for the acquisition pipeline, with mapping
//! from the underlying HTTP, I/O and parsing errors to a small set of
//! categories.
//!
//! # Error Categories
//!
//! * Transient upstream conditions that drive retry and failover
//!   (`RateLimited`, `Unavailable`)
//! * Terminal upstream conditions (`NotFound`, `Unauthenticated`,
//!   `Exhausted`, `InvalidArgument`)
//! * Local failures (`Decryption`, `Io`, `Internal`)
//! * Caller intent (`Cancelled`) and setup problems (`NotConfigured`,
//!   `Unsupported`)
//!
//! # Example
//!
//! ```rust
//! use trackfill::error::{Error, ErrorKind, Result};
//!
//! fn lookup(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(Error::not_found("track 123 does not exist"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for trackfill operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories of the acquisition pipeline.
///
/// Each variant notes the HTTP status it corresponds to, where there is one.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled,

    /// A required credential or setting is missing. No network call is made.
    #[error("not configured")]
    NotConfigured,

    /// The provider is not known to this coordinator.
    #[error("unsupported provider")]
    Unsupported,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound,

    /// HTTP Mapping: 400 Bad Request and other permanent 4xx
    #[error("invalid argument specified")]
    InvalidArgument,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("rate limited")]
    RateLimited,

    /// HTTP Mapping: 5xx, connection failures
    #[error("upstream unavailable")]
    Unavailable,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded,

    /// HTTP Mapping: 401 Unauthorized, 403 Forbidden
    #[error("no valid authentication credentials")]
    Unauthenticated,

    /// Every candidate instance or attempt was consumed.
    #[error("upstream exhausted")]
    Exhausted,

    /// The protected stream could not be decrypted.
    #[error("decryption failed")]
    Decryption,

    /// Local disk failure.
    #[error("I/O error")]
    Io,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Whether a `RetryPolicy` should attempt the operation again.
    ///
    /// Only service-unavailable and too-many-requests conditions qualify.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable)
    }

    /// Whether an upstream rejected the request itself, so that no other
    /// instance is expected to accept it either.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::NotFound | Self::InvalidArgument)
    }
}

macro_rules! constructors {
    ($($(#[$meta:meta])* $name:ident => $kind:ident,)*) => {
        impl Error {
            $(
                $(#[$meta])*
                pub fn $name<E>(error: E) -> Self
                where
                    E: Into<Box<dyn std::error::Error + Send + Sync>>,
                {
                    Self::new(ErrorKind::$kind, error)
                }
            )*
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "album not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Classifies a non-successful HTTP status.
    ///
    /// * 429 -> `RateLimited`
    /// * 401, 403 -> `Unauthenticated`
    /// * 404 -> `NotFound`
    /// * other 4xx -> `InvalidArgument`
    /// * 5xx -> `Unavailable`
    pub fn from_status<E>(status: StatusCode, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let kind = match status {
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthenticated,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            s if s.is_client_error() => ErrorKind::InvalidArgument,
            s if s.is_server_error() => ErrorKind::Unavailable,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, error)
    }
}

constructors! {
    /// Creates an error for operations abandoned by the caller.
    cancelled => Cancelled,
    /// Creates an error for a missing credential or setting.
    not_configured => NotConfigured,
    /// Creates an error for an unknown provider.
    unsupported => Unsupported,
    /// Creates an error for a missing track, album or resource.
    not_found => NotFound,
    /// Creates an error for a request the upstream rejected as malformed.
    invalid_argument => InvalidArgument,
    /// Creates an error for an upstream that asked us to slow down.
    rate_limited => RateLimited,
    /// Creates an error for an upstream that failed or could not be reached.
    unavailable => Unavailable,
    /// Creates an error for operations that exceeded their deadline.
    deadline_exceeded => DeadlineExceeded,
    /// Creates an error for rejected or expired credentials.
    unauthenticated => Unauthenticated,
    /// Creates an error for a consumed attempt budget.
    exhausted => Exhausted,
    /// Creates an error for a stream that could not be decrypted.
    decryption => Decryption,
    /// Creates an error for local disk failures.
    io => Io,
    /// Creates an error for conditions that should not occur.
    internal => Internal,
    /// Creates an error that fits no other category.
    unknown => Unknown,
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display as `"{kind}: {details}"`.
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors, keeping cancellation and timeouts distinguishable
/// from plain disk failures.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            TimedOut => Self::deadline_exceeded(err),
            Interrupted => Self::cancelled(err),
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected => {
                Self::unavailable(err)
            }
            _ => Self::io(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Timeout errors -> `DeadlineExceeded`
/// * Connect and body errors -> `Unavailable`
/// * Status errors -> classified like [`Error::from_status`]
/// * Decode errors -> `InvalidArgument`
/// * Builder errors -> `Internal`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if let Some(status) = err.status() {
            return Self::from_status(status, err);
        }

        if err.is_connect() || err.is_body() || err.is_request() {
            return Self::unavailable(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors to `InvalidArgument`.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts invalid header errors to `Internal`.
impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts Base64 decoding errors to `InvalidArgument`.
impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let err = Error::not_found("track 42");
        assert_eq!(err.to_string(), "not found: track 42");
    }

    #[test]
    fn status_classification() {
        let kind = |code: u16| {
            Error::from_status(StatusCode::from_u16(code).unwrap(), "status").kind
        };
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(401), ErrorKind::Unauthenticated);
        assert_eq!(kind(404), ErrorKind::NotFound);
        assert_eq!(kind(400), ErrorKind::InvalidArgument);
        assert_eq!(kind(503), ErrorKind::Unavailable);
    }

    #[test]
    fn only_throttling_and_outages_are_retryable() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Unavailable.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Exhausted.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
