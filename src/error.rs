//! Error taxonomies the watch loop has to tell apart.
//!
//! Fetch and classification failures are always recoverable inside a running
//! loop; the variants only decide which cooldown or log label applies.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::watch::types::Platform;

/// Failure while pulling posts from a platform.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (retry hint: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Network(_) => "network",
            FetchError::Unauthorized(_) => "unauthorized",
            FetchError::UnknownAccount(_) => "unknown_account",
            FetchError::Api { .. } => "api",
            FetchError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Category label attached to a failed classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    PermissionDenied,
    RateLimited,
    BadRequest,
    Unavailable,
    Timeout,
    Transport,
    Malformed,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Malformed => "malformed",
        }
    }
}

/// Failure of a single model submission.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("authentication failed, check the API key")]
    Auth,

    #[error("API key has no access to this resource")]
    PermissionDenied,

    #[error("model rate limit reached")]
    RateLimited,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("model service unavailable: {0}")]
    Unavailable(String),

    #[error("model request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl ClassifyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClassifyError::Auth => ErrorCategory::Auth,
            ClassifyError::PermissionDenied => ErrorCategory::PermissionDenied,
            ClassifyError::RateLimited => ErrorCategory::RateLimited,
            ClassifyError::BadRequest(_) => ErrorCategory::BadRequest,
            ClassifyError::Unavailable(_) => ErrorCategory::Unavailable,
            ClassifyError::Timeout => ErrorCategory::Timeout,
            ClassifyError::Transport(_) => ErrorCategory::Transport,
            ClassifyError::Malformed(_) => ErrorCategory::Malformed,
        }
    }
}

impl From<reqwest::Error> for ClassifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassifyError::Timeout
        } else if err.is_decode() {
            ClassifyError::Malformed(err.to_string())
        } else {
            ClassifyError::Transport(err.to_string())
        }
    }
}

/// Errors returned by control-surface commands.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("platform {0} has no authenticated source")]
    PlatformUnavailable(Platform),

    #[error("account @{username} is already watched on {platform}")]
    DuplicateAccount { username: String, platform: Platform },

    #[error("recipient {0} is already configured")]
    DuplicateRecipient(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to persist configuration: {0}")]
    Persist(String),

    #[error("supervisor is not running")]
    SupervisorGone,
}
