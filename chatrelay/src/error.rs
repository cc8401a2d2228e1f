use crate::types::Mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure categories shared by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    QuotaExceeded,
    InvalidRequest,
    ServiceUnavailable,
    AuthenticationError,
    Unknown,
    /// The caller abandoned the request. Never counted against a provider.
    Cancelled,
}

impl ErrorKind {
    /// Only transient server-side failures and unclassified errors are worth
    /// another attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ServiceUnavailable | ErrorKind::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from one provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider}: {kind}: {message}")]
pub struct AiError {
    pub message: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub provider: String,
    /// HTTP status of the upstream response, when there was one.
    pub status: Option<u16>,
}

impl AiError {
    pub fn new(provider: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            retryable: kind.is_retryable(),
            provider: provider.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Cancelled, "request cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Errors surfaced by the relay to its callers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("No providers registered for mode {0}")]
    NoProviders(Mode),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {provider} does not serve mode {mode}")]
    UnsupportedMode { provider: String, mode: Mode },

    #[error("Mode {0} is not a text mode")]
    NotTextMode(Mode),

    #[error("All {attempts} attempts failed; last error: {}", .last.message)]
    Exhausted { attempts: u32, last: AiError },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// The classified error behind this failure, if any.
    pub fn last_error(&self) -> Option<&AiError> {
        match self {
            RelayError::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
