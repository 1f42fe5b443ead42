use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure classes a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out-of-range or unparsable configuration. Always clamped or ignored,
    /// reported through logs and [`crate::core::scenario::ConfigIssue`]s.
    ConfigInvalid,
    Network,
    RateLimited,
    Server,
    InvalidResponse,
    StreamInterrupted,
    EmptyConversation,
    ModeMismatch,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Server => "server",
            ErrorKind::InvalidResponse => "invalid-response",
            ErrorKind::StreamInterrupted => "stream-interrupted",
            ErrorKind::EmptyConversation => "empty-conversation",
            ErrorKind::ModeMismatch => "mode-mismatch",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompletionError {
    /// Connection failure, dropped body or wall-clock timeout.
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by the API: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The payload could not be understood. Retrying cannot fix this.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The stream failed after `delivered` fragments had already reached
    /// the caller.
    #[error("stream interrupted after {delivered} fragments: {cause}")]
    StreamInterrupted {
        delivered: usize,
        cause: Box<CompletionError>,
    },

    #[error("conversation is empty")]
    EmptyConversation,

    #[error("request is configured for {expected} mode, called in {called} mode")]
    ModeMismatch {
        expected: &'static str,
        called: &'static str,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl CompletionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompletionError::Network(_) => ErrorKind::Network,
            CompletionError::RateLimited { .. } => ErrorKind::RateLimited,
            CompletionError::Server { .. } => ErrorKind::Server,
            CompletionError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            CompletionError::StreamInterrupted { .. } => ErrorKind::StreamInterrupted,
            CompletionError::EmptyConversation => ErrorKind::EmptyConversation,
            CompletionError::ModeMismatch { .. } => ErrorKind::ModeMismatch,
            CompletionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the retry engine may try again after this failure at all.
    /// How many times is decided by [`crate::core::transport::retry`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Server
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CompletionError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn interrupted(delivered: usize, cause: CompletionError) -> Self {
        CompletionError::StreamInterrupted {
            delivered,
            cause: Box::new(cause),
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CompletionError::InvalidResponse(err.to_string())
        } else {
            CompletionError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_follow_taxonomy() {
        assert!(CompletionError::Network("reset".into()).is_retryable());
        assert!(CompletionError::RateLimited {
            retry_after: None,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(CompletionError::Server {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!CompletionError::InvalidResponse("garbage".into()).is_retryable());
        assert!(!CompletionError::interrupted(3, CompletionError::Network("eof".into()))
            .is_retryable());
        assert!(!CompletionError::Cancelled.is_retryable());
    }

    #[test]
    fn interrupted_keeps_cause() {
        let err = CompletionError::interrupted(2, CompletionError::Network("reset".into()));
        assert_eq!(err.kind(), ErrorKind::StreamInterrupted);
        assert_eq!(
            err.to_string(),
            "stream interrupted after 2 fragments: network error: reset"
        );
        match err {
            CompletionError::StreamInterrupted { cause, .. } => {
                assert_eq!(cause.kind(), ErrorKind::Network)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let limited = CompletionError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
            message: String::new(),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(4)));
        assert_eq!(CompletionError::Network("x".into()).retry_after(), None);
    }
}
