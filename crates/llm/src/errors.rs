use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::orchestration::AttemptRecord;

/// Failure reported by a backend adapter for a single call.
///
/// Each variant classifies itself as retryable (transient; the same provider
/// may be tried again) or non-retryable (the request can never succeed on
/// this provider as sent; fail over immediately).
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl ProviderError {
    /// Map an HTTP-style status code onto the taxonomy.
    pub fn from_status_code(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            401 | 403 => Self::Authentication(message),
            400 | 404 | 413 | 422 => Self::InvalidRequest(message),
            _ => Self::Http { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited(_) => true,
            Self::Http { status, .. } => *status == 408 || (500..=599).contains(status),
            Self::Authentication(_) | Self::InvalidRequest(_) => false,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::RateLimited(_) => "rate_limit",
            Self::Authentication(_) => "authentication",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Http { status, .. } if (500..=599).contains(status) => "server_error",
            Self::Http { .. } => "http",
        }
    }
}

/// Errors surfaced to callers of the failover manager.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Every provider was circuit-open or excluded before any call was made.
    #[error("no available providers: every circuit is open or excluded")]
    NoAvailableProviders,

    /// Every provider that could be tried was tried and failed.
    #[error("all providers failed ({} recorded), last error: {last_error}", .attempts.len())]
    AllProvidersFailed {
        attempts: Vec<AttemptRecord>,
        last_error: ProviderError,
    },

    #[error("failover manager is shutting down")]
    ShuttingDown,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl FailoverError {
    /// Attempt trail for `AllProvidersFailed`, empty otherwise.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::AllProvidersFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),

    #[error("no providers registered")]
    NoProviders,
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type FailoverResult<T> = Result<T, FailoverError>;
