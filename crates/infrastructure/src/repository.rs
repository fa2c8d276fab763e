use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use application::{ApplicationError, MessageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{MessageId, RoomId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

/// 已保存的聊天消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_by: HashSet<UserId>,
}

/// 内存中的消息存储，ID 从 1 开始顺序分配
///
/// 进程重启后数据丢失，生产环境应替换为数据库实现。
pub struct InMemoryMessageStore {
    next_id: AtomicU64,
    messages: RwLock<HashMap<MessageId, StoredMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: MessageId) -> Option<StoredMessage> {
        self.messages.read().await.get(&id).cloned()
    }

    /// 房间内的消息，按 ID 升序
    pub async fn room_history(&self, room_id: RoomId) -> Vec<StoredMessage> {
        let messages = self.messages.read().await;
        let mut history: Vec<StoredMessage> = messages
            .values()
            .filter(|message| message.room_id == room_id)
            .cloned()
            .collect();
        history.sort_by_key(|message| message.id);
        history
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<MessageId, ApplicationError> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let message = StoredMessage {
            id,
            room_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
            read_by: HashSet::new(),
        };

        self.messages.write().await.insert(id, message);
        debug!(message_id = %id, room_id = %room_id, sender_id = %sender_id, "消息已保存");
        Ok(id)
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        reader_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(&message_id)
            .filter(|message| message.room_id == room_id)
            .ok_or_else(|| {
                ApplicationError::store(format!(
                    "message {} not found in room {}",
                    message_id, room_id
                ))
            })?;

        message.read_by.insert(reader_id);
        Ok(())
    }
}
