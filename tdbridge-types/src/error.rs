//! TDLib's `error` object.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An error returned by TDLib in response to a request.
///
/// # Example
/// `{"@type":"error","code":400,"message":"PHONE_CODE_INVALID"}`
/// → `TdError { code: 400, message: "PHONE_CODE_INVALID" }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdError {
    /// HTTP-like status code.
    #[serde(default)]
    pub code: i32,
    /// Human-readable or SCREAMING_SNAKE_CASE error text.
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for TdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDLib error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TdError {}

impl TdError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Match on the error message, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("PHONE_CODE_INVALID")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.message.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.message.ends_with(suffix)
        } else {
            self.message == pattern
        }
    }

    /// Seconds to wait before retrying, for `429 Too Many Requests: retry after N`.
    pub fn retry_after(&self) -> Option<u64> {
        if self.code != 429 {
            return None;
        }
        let idx = self.message.rfind("retry after ")?;
        self.message[idx + "retry after ".len()..]
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|digits| digits.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        let err = TdError::new(400, "PHONE_CODE_INVALID");
        assert!(err.is("PHONE_CODE_INVALID"));
        assert!(err.is("PHONE_CODE_*"));
        assert!(err.is("*_INVALID"));
        assert!(!err.is("PASSWORD_*"));
    }

    #[test]
    fn retry_after_only_for_429() {
        let err = TdError::new(429, "Too Many Requests: retry after 17");
        assert_eq!(err.retry_after(), Some(17));
        assert_eq!(TdError::new(400, "retry after 17").retry_after(), None);
        assert_eq!(TdError::new(429, "Too Many Requests").retry_after(), None);
    }
}
