//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数非法
    #[error("参数非法: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 帧格式错误
    #[error("帧格式错误: {message}")]
    InvalidFrame { message: String },

    /// 事件负载与事件类型不匹配
    #[error("事件负载错误: {event_type}: {message}")]
    InvalidEventBody { event_type: String, message: String },

    /// 序列化失败
    #[error("序列化失败: {message}")]
    Serialization { message: String },
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建帧格式错误
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// 创建事件负载错误
    pub fn invalid_event_body(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEventBody {
            event_type: event_type.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(value: serde_json::Error) -> Self {
        Self::serialization(value.to_string())
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
