use domain::DomainError;
use thiserror::Error;

use crate::rate_limiter::RateLimitError;

/// 推送中心对调用方暴露的错误
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub has been shut down")]
    ShutDown,
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
    #[error("failed to encode frame: {0}")]
    Serialization(String),
}

impl HubError {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

impl From<DomainError> for HubError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { reason, .. } => Self::invalid_argument("frame", reason),
            other => Self::Serialization(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
    #[error("rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
    #[error("message store error: {0}")]
    Store(String),
    #[error("user directory error: {0}")]
    Directory(String),
    #[error("event handler error: {0}")]
    Handler(String),
}

impl ApplicationError {
    pub fn store(message: impl Into<String>) -> Self {
        ApplicationError::Store(message.into())
    }

    pub fn directory(message: impl Into<String>) -> Self {
        ApplicationError::Directory(message.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        ApplicationError::Handler(message.into())
    }
}
