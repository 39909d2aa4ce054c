//! Error types for tdbridge-client.

use std::fmt;
use std::time::Duration;

use tdbridge_types::{DecodeError, TdError};

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any `Client` method that talks to TDLib.
///
/// Library-level failures arrive as [`InvocationError::Td`]; they are the
/// `Err` side of a normal reply, not a malfunction of the client.
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationError {
    /// TDLib answered with an `error` object.
    Td(TdError),
    /// The native send/receive path failed. Fatal: the client stops.
    Transport(String),
    /// No response arrived within the caller's deadline.
    Timeout(Duration),
    /// The client is not running, or shut down while the call was pending.
    Closed,
    /// The request was rejected before being sent (e.g. no `@type`).
    InvalidRequest(String),
    /// A request could not be encoded or a response did not have the expected shape.
    Decode(String),
    /// The native instance could not be created.
    Initialization(String),
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Td(e)              => write!(f, "{e}"),
            Self::Transport(s)       => write!(f, "transport error: {s}"),
            Self::Timeout(d)         => write!(f, "no response within {d:?}"),
            Self::Closed             => write!(f, "client is closed"),
            Self::InvalidRequest(s)  => write!(f, "invalid request: {s}"),
            Self::Decode(s)          => write!(f, "decode error: {s}"),
            Self::Initialization(s)  => write!(f, "initialization failed: {s}"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Td(e) => Some(e),
            _           => None,
        }
    }
}

impl From<TdError> for InvocationError {
    fn from(e: TdError) -> Self { Self::Td(e) }
}

impl From<serde_json::Error> for InvocationError {
    fn from(e: serde_json::Error) -> Self { Self::Decode(e.to_string()) }
}

impl From<DecodeError> for InvocationError {
    fn from(e: DecodeError) -> Self { Self::Decode(e.to_string()) }
}

impl InvocationError {
    /// Returns `true` if this is the named TDLib error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Td(e) => e.is(pattern),
            _           => false,
        }
    }

    /// The library error, if this is one.
    pub fn td(&self) -> Option<&TdError> {
        match self {
            Self::Td(e) => Some(e),
            _           => None,
        }
    }

    /// `true` for failures after which the client can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed | Self::Initialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_match_by_name() {
        let err = InvocationError::from(TdError::new(400, "PASSWORD_HASH_INVALID"));
        assert!(err.is("PASSWORD_*"));
        assert!(!err.is_fatal());
        assert!(!InvocationError::Closed.is("PASSWORD_*"));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(InvocationError::Closed.to_string(), "client is closed");
        assert_eq!(
            InvocationError::Transport("boom".into()).to_string(),
            "transport error: boom"
        );
    }
}
