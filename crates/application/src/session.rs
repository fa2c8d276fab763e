//! 会话句柄
//!
//! 推送中心只通过 `SessionHandle` 接触一个在线会话：非阻塞入队和关闭。
//! 传输层（读写循环）持有对应的 `OutboundQueue`，是队列唯一的消费者。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use domain::{SessionId, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};

/// 已序列化的帧，扇出时多个会话共享同一份内存
pub type EncodedFrame = Arc<str>;

/// 入队失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

pub struct SessionHandle {
    id: SessionId,
    user_id: UserId,
    /// 关闭队列即丢弃发送端，写循环读完剩余帧后退出
    sender: RwLock<Option<mpsc::Sender<EncodedFrame>>>,
    created_at: Instant,
    /// 相对 created_at 的毫秒数
    last_pong_ms: AtomicU64,
}

impl SessionHandle {
    /// 创建会话句柄和与之配对的有界发送队列
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: SessionId::generate(),
            user_id,
            sender: RwLock::new(Some(sender)),
            created_at: Instant::now(),
            last_pong_ms: AtomicU64::new(0),
        });
        (handle, OutboundQueue { receiver })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 非阻塞入队
    pub fn send(&self, frame: EncodedFrame) -> Result<(), EnqueueError> {
        let guard = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };

        sender.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// 关闭发送队列，返回本次调用是否真正执行了关闭
    pub fn close(&self) -> bool {
        self.sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }

    /// 收到 pong（或任何入站流量）时刷新存活时间
    pub fn record_pong(&self) {
        let elapsed = self.created_at.elapsed().as_millis();
        self.last_pong_ms
            .store(u64::try_from(elapsed).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// 距离上一次 pong 的时长
    pub fn since_last_pong(&self) -> Duration {
        let last = Duration::from_millis(self.last_pong_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 会话发送队列的消费端
#[derive(Debug)]
pub struct OutboundQueue {
    receiver: mpsc::Receiver<EncodedFrame>,
}

impl OutboundQueue {
    /// 等待下一帧；队列关闭且已读空时返回 None
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        self.receiver.recv().await
    }

    /// 非阻塞读取；队列关闭且为空返回 `Err(EnqueueError::Closed)`
    pub fn try_recv(&mut self) -> Result<Option<EncodedFrame>, EnqueueError> {
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(EnqueueError::Closed),
        }
    }

    /// 读出当前已排队的所有帧
    pub fn drain(&mut self) -> Vec<EncodedFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_queue_reports_full() {
        let (handle, mut queue) = SessionHandle::new(UserId(1), 2);
        assert!(handle.send(Arc::from("a")).is_ok());
        assert!(handle.send(Arc::from("b")).is_ok());
        assert_eq!(handle.send(Arc::from("c")), Err(EnqueueError::Full));

        assert_eq!(queue.recv().await.as_deref(), Some("a"));
        assert!(handle.send(Arc::from("c")).is_ok());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (handle, mut queue) = SessionHandle::new(UserId(1), 4);
        handle.send(Arc::from("last")).unwrap();

        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_closed());
        assert_eq!(handle.send(Arc::from("late")), Err(EnqueueError::Closed));

        assert_eq!(queue.recv().await.as_deref(), Some("last"));
        assert_eq!(queue.recv().await, None);
    }

    #[test]
    fn test_dropped_consumer_closes_handle() {
        let (handle, queue) = SessionHandle::new(UserId(1), 1);
        drop(queue);
        assert!(handle.is_closed());
        assert_eq!(handle.send(Arc::from("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn test_pong_tracking() {
        let (handle, _queue) = SessionHandle::new(UserId(1), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(handle.since_last_pong() >= Duration::from_millis(20));
        handle.record_pong();
        assert!(handle.since_last_pong() < Duration::from_millis(20));
    }
}
