//! 应用层实现。
//!
//! 实时推送中心的核心：限流器、进程内事件总线、会话句柄、推送中心（Hub）
//! 以及把上行帧和领域事件翻译为推送调用的聊天分发器。
//! 持久化和用户状态通过 [`MessageStore`]、[`UserDirectory`] 抽象交给外部协作者。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod hub;
pub mod rate_limiter;
pub mod repository;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{ChatDispatcher, HubEventHandler, RATE_LIMIT_EXCEEDED};
pub use error::{ApplicationError, HubError};
pub use event_bus::{EventBus, EventHandler, EventPublisher, HandlerId};
pub use hub::{Hub, WeakHub};
pub use rate_limiter::{
    RateLimitError, RateLimitPresets, RateLimitStats, RateLimiter, SlidingWindowLimiter,
    TokenBucketLimiter,
};
pub use repository::{MessageStore, UserDirectory, UserStatus};
pub use session::{EncodedFrame, EnqueueError, OutboundQueue, SessionHandle};

#[cfg(any(test, feature = "testing"))]
pub use repository::{MockMessageStore, MockUserDirectory};
