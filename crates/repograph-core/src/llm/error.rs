//! Errors reported by outbound collaborators (LLM, embedding service)

use std::fmt;

use thiserror::Error;

/// Flavor of a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The service asked us to slow down
    RateLimited,
    Timeout,
    /// 5xx or connection failure
    Unavailable,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collaborator failure, split into retryable and non-retryable
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{kind}: {message}")]
    Transient {
        kind: TransientKind,
        message: String,
        /// Server-suggested wait in seconds, if any
        retry_after: Option<u64>,
    },

    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        Self::Transient {
            kind: TransientKind::RateLimited,
            message: "rate limit exceeded".to_string(),
            retry_after,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                kind: TransientKind::RateLimited,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient(TransientKind::Timeout, err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::transient(TransientKind::Unavailable, err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}

impl From<CollaboratorError> for crate::error::Error {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Transient { kind, message, .. } => Self::TransientCollaborator {
                kind: kind.to_string(),
                message,
            },
            CollaboratorError::Permanent(message) => Self::Collaborator(message),
        }
    }
}
