//! Unified error taxonomy for pvetui-core.
//!
//! Every fallible operation in the crate returns `Result<T, PveError>`.
//! `category()`/`retryability()` give the HTTP engagement layer and the
//! task manager one shared place to decide whether a failure is worth
//! retrying, instead of re-deriving that decision at each call site.

use std::fmt;
use std::time::Duration;

/// Canonical error kind, one variant per role named in the specification.
#[derive(Debug, thiserror::Error)]
pub enum PveError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("authentication expired and refresh failed: {0}")]
    AuthExpired(String),

    #[error("HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("busy: {0}")]
    Busy(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Retry/backoff classification shared by the HTTP engagement layer and
/// the task manager's poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    RequiresIntervention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retryability {
    Retryable { max_attempts: u32, backoff: BackoffStrategy },
    NonRetryable,
    RequiresIntervention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential { base_ms: u64, max_ms: u64 },
}

impl PveError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PveError::Transport(_) | PveError::Timeout(_) | PveError::Busy(_) => {
                ErrorCategory::Retryable
            }
            PveError::HttpStatus { code, .. } => {
                if matches!(*code, 408 | 429) || (500..=599).contains(code) {
                    ErrorCategory::Retryable
                } else {
                    ErrorCategory::NonRetryable
                }
            }
            PveError::AuthExpired(_) => ErrorCategory::Retryable,
            PveError::ConfigInvalid(_)
            | PveError::AuthRejected(_)
            | PveError::Decode(_)
            | PveError::NotFound(_)
            | PveError::Cancelled => ErrorCategory::NonRetryable,
            PveError::Internal(_) => ErrorCategory::RequiresIntervention,
        }
    }

    pub fn retryability(&self) -> Retryability {
        match self.category() {
            ErrorCategory::Retryable => Retryability::Retryable {
                max_attempts: 3,
                backoff: BackoffStrategy::Exponential { base_ms: 250, max_ms: 4_000 },
            },
            ErrorCategory::NonRetryable => Retryability::NonRetryable,
            ErrorCategory::RequiresIntervention => Retryability::RequiresIntervention,
        }
    }

    /// A 401 observed mid-request is not its own variant; callers construct
    /// this from the HTTP status path and treat it as `AuthExpired` before
    /// falling back to `AuthRejected` once a refresh has already been tried.
    pub fn from_status(code: u16, body: String) -> Self {
        PveError::HttpStatus { code, body }
    }
}

/// `Display`/`Debug` wrapper that renders `<redacted>` for anything that
/// should never reach a log line: tickets, CSRF tokens, API token secrets.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_retry_classification() {
        assert_eq!(
            PveError::from_status(500, String::new()).category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            PveError::from_status(404, String::new()).category(),
            ErrorCategory::NonRetryable
        );
        assert_eq!(
            PveError::from_status(429, String::new()).category(),
            ErrorCategory::Retryable
        );
    }

    #[test]
    fn redacted_never_prints_inner_value() {
        let secret = Redacted("super-secret-ticket".to_string());
        assert_eq!(format!("{secret}"), "<redacted>");
        assert_eq!(format!("{secret:?}"), "<redacted>");
    }
}
