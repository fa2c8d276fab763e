//! 领域事件
//!
//! 由业务代码发布、经事件总线分发给订阅者的进程内通知。
//! 信封是通用的 `{id, type, timestamp, aggregate_id, body}`，
//! 推送中心识别的几种事件另有强类型的 body。

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 推送中心识别的事件类型
pub mod event_types {
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const USER_JOINED: &str = "user.joined";
    pub const USER_LEFT: &str = "user.left";
    pub const MATCH_CREATED: &str = "match.created";
}

/// 领域事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Timestamp,
    pub aggregate_id: String,
    #[serde(default)]
    pub body: Value,
}

/// 强类型事件负载
pub trait EventBody: Serialize + DeserializeOwned {
    const EVENT_TYPE: &'static str;

    fn aggregate_id(&self) -> String;
}

impl DomainEvent {
    /// 构造任意类型的事件（对外部服务透明转发时使用）
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        body: Value,
    ) -> DomainResult<Self> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(DomainError::invalid_argument("type", "cannot be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            aggregate_id: aggregate_id.into(),
            body,
        })
    }

    pub fn from_body<B: EventBody>(body: &B) -> DomainResult<Self> {
        Self::new(B::EVENT_TYPE, body.aggregate_id(), serde_json::to_value(body)?)
    }

    /// 按类型解码 body；类型不匹配时返回错误
    pub fn body_as<B: EventBody>(&self) -> DomainResult<B> {
        if self.event_type != B::EVENT_TYPE {
            return Err(DomainError::invalid_event_body(
                &self.event_type,
                format!("expected {}", B::EVENT_TYPE),
            ));
        }
        serde_json::from_value(self.body.clone())
            .map_err(|err| DomainError::invalid_event_body(&self.event_type, err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSent {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub content: String,
}

impl EventBody for MessageSent {
    const EVENT_TYPE: &'static str = event_types::MESSAGE_SENT;

    fn aggregate_id(&self) -> String {
        self.room_id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoined {
    pub room_id: RoomId,
    pub user_id: UserId,
}

impl EventBody for UserJoined {
    const EVENT_TYPE: &'static str = event_types::USER_JOINED;

    fn aggregate_id(&self) -> String {
        self.room_id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeft {
    pub room_id: RoomId,
    pub user_id: UserId,
}

impl EventBody for UserLeft {
    const EVENT_TYPE: &'static str = event_types::USER_LEFT;

    fn aggregate_id(&self) -> String {
        self.room_id.to_string()
    }
}

/// 配对成功，`chat_id` 为双方的聊天室
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCreated {
    pub user_a: UserId,
    pub user_b: UserId,
    pub chat_id: RoomId,
}

impl EventBody for MatchCreated {
    const EVENT_TYPE: &'static str = event_types::MATCH_CREATED;

    fn aggregate_id(&self) -> String {
        self.chat_id.to_string()
    }
}
