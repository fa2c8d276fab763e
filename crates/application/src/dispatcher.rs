//! 聊天分发器
//!
//! 把会话上行的帧和事件总线上的领域事件翻译成推送中心调用。
//! 分发器本身无状态，所有在线状态都在 [`Hub`] 中。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    event_types, kinds, ChatRef, DomainError, DomainEvent, ErrorNotice, Frame, LikeNotice,
    MatchCreated, MessageDelivered, MessageRead, MessageReadRequest, MessageSent, NewMatch,
    NewMessage, OnlineStatus, PhotoLiked, Pong, RoomId, SendMessageRequest, TypingStatus, UserId,
    UserJoined, UserLeft,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::event_bus::{EventBus, EventHandler, EventPublisher, HandlerId};
use crate::hub::Hub;
use crate::rate_limiter::{user_key, RateLimitError, RateLimiter};
use crate::repository::MessageStore;
use crate::session::SessionHandle;

pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// 上行帧分发器
pub struct ChatDispatcher {
    hub: Hub,
    store: Arc<dyn MessageStore>,
    publisher: Arc<dyn EventPublisher>,
    chat_limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl ChatDispatcher {
    pub fn new(
        hub: Hub,
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn EventPublisher>,
        chat_limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hub,
            store,
            publisher,
            chat_limiter,
            clock,
        }
    }

    /// 处理一条上行帧。负载无法解码时返回错误，由会话计为协议错误。
    pub async fn handle_frame(
        &self,
        session: &Arc<SessionHandle>,
        frame: Frame,
    ) -> Result<(), ApplicationError> {
        let user_id = session.user_id();
        tracing::debug!(user_id = %user_id, kind = %frame.kind, "处理上行帧");

        match frame.kind.as_str() {
            kinds::PING => {
                let pong = Pong {
                    ts: self.clock.now().timestamp(),
                };
                self.hub.send_to_session(session, kinds::PONG, pong).await?;
            }
            kinds::JOIN_CHAT => {
                let ChatRef { chat_id } = frame.payload()?;
                self.hub.join_room(user_id, chat_id).await?;
            }
            kinds::LEAVE_CHAT => {
                let ChatRef { chat_id } = frame.payload()?;
                self.hub.leave_room(user_id, chat_id).await?;
            }
            kinds::SEND_MESSAGE => {
                let request: SendMessageRequest = frame.payload()?;
                self.send_message(session, request).await?;
            }
            kinds::TYPING_START | kinds::TYPING_STOP => {
                let ChatRef { chat_id } = frame.payload()?;
                let status = TypingStatus {
                    chat_id,
                    sender_id: user_id,
                    is_typing: frame.kind == kinds::TYPING_START,
                };
                self.hub
                    .send_to_room(chat_id, kinds::TYPING_STATUS, status, &[user_id])
                    .await?;
            }
            kinds::MESSAGE_READ => {
                let MessageReadRequest {
                    chat_id,
                    message_id,
                } = frame.payload()?;
                self.store.mark_read(chat_id, message_id, user_id).await?;
                let read = MessageRead {
                    chat_id,
                    message_id,
                    reader_id: user_id,
                };
                self.hub
                    .send_to_room(chat_id, kinds::MESSAGE_READ, read, &[])
                    .await?;
            }
            other => {
                tracing::debug!(user_id = %user_id, kind = other, "忽略未知帧类型");
            }
        }
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Arc<SessionHandle>,
        request: SendMessageRequest,
    ) -> Result<(), ApplicationError> {
        let user_id = session.user_id();
        if request.content.trim().is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty").into());
        }

        match self.chat_limiter.check(&user_key(user_id)) {
            Ok(()) => {}
            Err(RateLimitError::Exceeded { retry_after, .. }) => {
                tracing::warn!(user_id = %user_id, room_id = %request.chat_id, "聊天消息被限流");
                let wait_secs =
                    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let notice = ErrorNotice {
                    code: RATE_LIMIT_EXCEEDED.to_string(),
                    message: "sending messages too fast".to_string(),
                    retry_after: Some(wait_secs.max(1)),
                };
                self.hub.send_to_session(session, kinds::ERROR, notice).await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let message_id = self
            .store
            .save_message(request.chat_id, user_id, &request.content)
            .await?;

        let event = DomainEvent::from_body(&MessageSent {
            room_id: request.chat_id,
            sender_id: user_id,
            message_id,
            content: request.content,
        })?;
        self.publisher.publish(event).await?;

        let delivered = MessageDelivered {
            chat_id: request.chat_id,
            message_id,
            timestamp: self.clock.now(),
        };
        self.hub
            .send_to_session(session, kinds::MESSAGE_DELIVERED, delivered)
            .await?;
        Ok(())
    }

    /// 收到喜欢
    pub async fn notify_like(&self, from: UserId, to: UserId) -> Result<bool, ApplicationError> {
        let notice = LikeNotice {
            from_user_id: from,
            timestamp: self.clock.now(),
        };
        Ok(self.hub.send_to_user(to, kinds::RECEIVED_LIKE, notice).await?)
    }

    /// 收到超级喜欢
    pub async fn notify_super_like(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<bool, ApplicationError> {
        let notice = LikeNotice {
            from_user_id: from,
            timestamp: self.clock.now(),
        };
        Ok(self
            .hub
            .send_to_user(to, kinds::RECEIVED_SUPER_LIKE, notice)
            .await?)
    }

    pub async fn notify_photo_liked(
        &self,
        from: UserId,
        to: UserId,
        photo_id: u64,
    ) -> Result<bool, ApplicationError> {
        let notice = PhotoLiked {
            from_user_id: from,
            photo_id,
            timestamp: self.clock.now(),
        };
        Ok(self.hub.send_to_user(to, kinds::PHOTO_LIKED, notice).await?)
    }
}

/// 订阅在事件总线上、把领域事件推送给在线会话的处理器
pub struct HubEventHandler {
    hub: Hub,
    clock: Arc<dyn Clock>,
}

impl HubEventHandler {
    pub const EVENT_TYPES: [&'static str; 4] = [
        event_types::MESSAGE_SENT,
        event_types::USER_JOINED,
        event_types::USER_LEFT,
        event_types::MATCH_CREATED,
    ];

    pub fn new(hub: Hub, clock: Arc<dyn Clock>) -> Self {
        Self { hub, clock }
    }

    /// 在总线上订阅全部已知事件类型
    pub fn subscribe_to(self: Arc<Self>, bus: &EventBus) -> Vec<HandlerId> {
        Self::EVENT_TYPES
            .iter()
            .map(|event_type| bus.subscribe(event_type, self.clone()))
            .collect()
    }

    async fn room_presence(
        &self,
        room_id: RoomId,
        user_id: UserId,
        is_online: bool,
    ) -> Result<(), ApplicationError> {
        let status = OnlineStatus {
            user_id,
            is_online,
            last_seen: self.clock.now(),
        };
        self.hub
            .send_to_room(room_id, kinds::USER_ONLINE_STATUS, status, &[user_id])
            .await?;
        Ok(())
    }

    async fn new_match(
        &self,
        to: UserId,
        other: UserId,
        chat_id: RoomId,
    ) -> Result<(), ApplicationError> {
        let notice = NewMatch {
            match_user_id: other,
            chat_id,
            timestamp: self.clock.now(),
        };
        self.hub.send_to_user(to, kinds::NEW_MATCH, notice).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for HubEventHandler {
    fn name(&self) -> &str {
        "hub_event_handler"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        Self::EVENT_TYPES.iter().any(|known| *known == event_type)
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), ApplicationError> {
        match event.event_type.as_str() {
            event_types::MESSAGE_SENT => {
                let body: MessageSent = event.body_as()?;
                let message = NewMessage {
                    chat_id: body.room_id,
                    sender_id: body.sender_id,
                    message_id: body.message_id,
                    content: body.content,
                    timestamp: event.timestamp,
                };
                let delivered = self
                    .hub
                    .send_to_room(body.room_id, kinds::NEW_MESSAGE, message, &[])
                    .await?;
                tracing::debug!(room_id = %body.room_id, delivered, "新消息已推送");
            }
            event_types::USER_JOINED => {
                let body: UserJoined = event.body_as()?;
                self.room_presence(body.room_id, body.user_id, true).await?;
            }
            event_types::USER_LEFT => {
                let body: UserLeft = event.body_as()?;
                self.room_presence(body.room_id, body.user_id, false).await?;
            }
            event_types::MATCH_CREATED => {
                let body: MatchCreated = event.body_as()?;
                self.new_match(body.user_a, body.user_b, body.chat_id).await?;
                self.new_match(body.user_b, body.user_a, body.chat_id).await?;
            }
            other => {
                tracing::debug!(event_type = other, "忽略未订阅的事件类型");
            }
        }
        Ok(())
    }
}
