//! 线上帧定义
//!
//! 客户端与服务端之间交换的每条文本消息都是 `{"type": <kind>, "data": <any>}`。
//! 这里定义信封本身、已知的帧类型，以及各类型对应的负载结构。

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, RoomId, SessionId, Timestamp, UserId};

/// 已知的帧类型
pub mod kinds {
    pub const CONNECTED: &str = "connected";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const TYPING_STATUS: &str = "typing_status";
    pub const MESSAGE_READ: &str = "message_read";
    pub const MESSAGE_DELIVERED: &str = "message_delivered";
    pub const USER_ONLINE_STATUS: &str = "user_online_status";
    pub const NEW_MATCH: &str = "new_match";
    pub const RECEIVED_LIKE: &str = "received_like";
    pub const RECEIVED_SUPER_LIKE: &str = "received_super_like";
    pub const PHOTO_LIKED: &str = "photo_liked";
    pub const CHAT_JOINED: &str = "chat_joined";
    pub const CHAT_LEFT: &str = "chat_left";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";

    // 仅入站
    pub const JOIN_CHAT: &str = "join_chat";
    pub const LEAVE_CHAT: &str = "leave_chat";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";
}

/// 帧信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(kind: impl Into<String>, data: impl Serialize) -> DomainResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(DomainError::invalid_argument("kind", "cannot be empty"));
        }
        Ok(Self {
            kind,
            data: serde_json::to_value(data)?,
        })
    }

    /// 解析客户端发来的文本帧
    pub fn from_json(text: &str) -> DomainResult<Self> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|err| DomainError::invalid_frame(err.to_string()))?;
        if frame.kind.is_empty() {
            return Err(DomainError::invalid_frame("missing frame type"));
        }
        Ok(frame)
    }

    pub fn to_json(&self) -> DomainResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 将 data 解码为具体负载
    pub fn payload<T: DeserializeOwned>(&self) -> DomainResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|err| {
            DomainError::invalid_frame(format!("{} payload: {}", self.kind, err))
        })
    }
}

// ---- 入站负载 ----

/// `join_chat` / `leave_chat` / `typing_*` 共用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: RoomId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReadRequest {
    pub chat_id: RoomId,
    pub message_id: MessageId,
}

// ---- 出站负载 ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    pub client_id: SessionId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub chat_id: RoomId,
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub content: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingStatus {
    pub chat_id: RoomId,
    pub sender_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRead {
    pub chat_id: RoomId,
    pub message_id: MessageId,
    pub reader_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivered {
    pub chat_id: RoomId,
    pub message_id: MessageId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineStatus {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMatch {
    pub match_user_id: UserId,
    pub chat_id: RoomId,
    pub timestamp: Timestamp,
}

/// `received_like` / `received_super_like`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeNotice {
    pub from_user_id: UserId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoLiked {
    pub from_user_id: UserId,
    pub photo_id: u64,
    pub timestamp: Timestamp,
}

/// `chat_joined` / `chat_left`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMembership {
    pub chat_id: RoomId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_uses_type_and_data_keys() {
        let frame = Frame::new(
            kinds::TYPING_STATUS,
            TypingStatus {
                chat_id: RoomId(42),
                sender_id: UserId(1),
                is_typing: true,
            },
        )
        .unwrap();

        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "typing_status", "data": {"chat_id": 42, "sender_id": 1, "is_typing": true}})
        );
    }

    #[test]
    fn inbound_frame_without_data_defaults_to_null() {
        let frame = Frame::from_json(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame.kind, kinds::PING);
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(Frame::from_json("not json").is_err());
        assert!(Frame::from_json(r#"{"data":{}}"#).is_err());
        assert!(Frame::from_json(r#"{"type":"","data":{}}"#).is_err());
    }

    #[test]
    fn payload_decoding_reports_kind() {
        let frame = Frame::from_json(r#"{"type":"join_chat","data":{"chat":1}}"#).unwrap();
        let err = frame.payload::<ChatRef>().unwrap_err();
        assert!(err.to_string().contains("join_chat"));

        let frame = Frame::from_json(r#"{"type":"join_chat","data":{"chat_id":9}}"#).unwrap();
        assert_eq!(frame.payload::<ChatRef>().unwrap().chat_id, RoomId(9));
    }

    #[test]
    fn empty_kind_is_invalid_argument() {
        assert!(matches!(
            Frame::new("", 1),
            Err(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn error_notice_omits_missing_retry_after() {
        let notice = ErrorNotice {
            code: "BAD_FRAME".into(),
            message: "oops".into(),
            retry_after: None,
        };
        let value = serde_json::to_value(notice).unwrap();
        assert!(value.get("retry_after").is_none());
    }
}
