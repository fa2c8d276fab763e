//! 进程内事件总线
//!
//! 事件类型 -> 处理器列表。发布时在读锁下快照处理器列表，释放锁后为每个
//! 处理器单独派生任务：慢的或失败的处理器不会阻塞、也不会影响其他处理器。
//! 投递是尽力而为的，不保证持久化，也不保证跨类型的全局顺序。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::DomainEvent;

use crate::error::ApplicationError;

/// 事件处理器
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 用于日志的处理器名称
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn can_handle(&self, _event_type: &str) -> bool {
        true
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), ApplicationError>;
}

/// 事件发布端，跨进程扇出时可以替换为外部消息总线
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<usize, ApplicationError>;
}

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

type Registry = HashMap<String, Vec<(HandlerId, Arc<dyn EventHandler>)>>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Registry>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));

        tracing::debug!(event_type, handler_id = %id, "事件处理器已订阅");
        id
    }

    /// 返回是否找到并移除了该处理器
    pub fn unsubscribe(&self, event_type: &str, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// 发布事件，返回派生的处理任务数；不等待处理完成。
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn publish(&self, event: DomainEvent) -> usize {
        let snapshot: Vec<Arc<dyn EventHandler>> = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handlers
                .get(&event.event_type)
                .map(|list| {
                    list.iter()
                        .filter(|(_, handler)| handler.can_handle(&event.event_type))
                        .map(|(_, handler)| handler.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            tracing::debug!(event_type = %event.event_type, event_id = %event.id, "事件无订阅者");
            return 0;
        }

        let event = Arc::new(event);
        let spawned = snapshot.len();
        for handler in snapshot {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = handler.handle(&event).await {
                    tracing::error!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        event_id = %event.id,
                        error = %err,
                        "事件处理失败"
                    );
                }
            });
        }
        spawned
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: DomainEvent) -> Result<usize, ApplicationError> {
        Ok(EventBus::publish(self, event))
    }
}
