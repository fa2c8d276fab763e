//! 推送中心依赖的外部协作者
//!
//! 持久化和用户状态都归周边服务所有，这里只定义推送中心需要的最小接口。

use async_trait::async_trait;
use domain::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// 消息持久化
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 保存一条聊天消息，返回分配的消息 ID
    async fn save_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<MessageId, ApplicationError>;

    /// 记录已读状态
    async fn mark_read(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        reader_id: UserId,
    ) -> Result<(), ApplicationError>;
}

/// 账号状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Banned,
}

/// 用户目录，用于建连时的账号状态检查
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn status(&self, user_id: UserId) -> Result<UserStatus, ApplicationError>;
}
