use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;

use super::{RateLimitError, RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};
use crate::clock::Clock;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 周边 HTTP 层和推送中心使用的预设限流器
///
/// 作为显式值在应用上下文中传递，不存在进程级单例。
#[derive(Clone)]
pub struct RateLimitPresets {
    /// API 基线：60 次 / 分钟，按 IP
    pub api: Arc<dyn RateLimiter>,
    /// 登录：5 次 / 15 分钟，key 为 `login:<ip>`
    pub login: Arc<dyn RateLimiter>,
    /// 注册：3 次 / 小时，key 为 `register:<ip>`
    pub registration: Arc<dyn RateLimiter>,
    /// 聊天消息：令牌桶，容量 30，30 个 / 分钟，按用户
    pub chat_message: Arc<dyn RateLimiter>,
    /// 滑动操作：100 次 / 小时，按用户
    pub swipe: Arc<dyn RateLimiter>,
    /// 照片上传：20 次 / 天，按用户
    pub photo_upload: Arc<dyn RateLimiter>,
    /// WebSocket 建连：默认 10 次 / 分钟，key 为 `ws:<ip>`
    pub ws_connect: Arc<dyn RateLimiter>,
}

impl RateLimitPresets {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        Ok(Self {
            api: Arc::new(SlidingWindowLimiter::new(60, MINUTE, clock.clone())?),
            login: Arc::new(SlidingWindowLimiter::new(5, 15 * MINUTE, clock.clone())?),
            registration: Arc::new(SlidingWindowLimiter::new(3, HOUR, clock.clone())?),
            chat_message: Arc::new(TokenBucketLimiter::per_window(
                30,
                30,
                MINUTE,
                clock.clone(),
            )?),
            swipe: Arc::new(SlidingWindowLimiter::new(100, HOUR, clock.clone())?),
            photo_upload: Arc::new(SlidingWindowLimiter::new(20, DAY, clock.clone())?),
            ws_connect: Arc::new(SlidingWindowLimiter::new(
                config.ws_connections_per_minute,
                MINUTE,
                clock,
            )?),
        })
    }

    /// 全部预设，供周期清理任务遍历
    pub fn all(&self) -> Vec<(&'static str, Arc<dyn RateLimiter>)> {
        vec![
            ("api", self.api.clone()),
            ("login", self.login.clone()),
            ("registration", self.registration.clone()),
            ("chat_message", self.chat_message.clone()),
            ("swipe", self.swipe.clone()),
            ("photo_upload", self.photo_upload.clone()),
            ("ws_connect", self.ws_connect.clone()),
        ]
    }

    /// 对所有预设执行一次回收，返回回收的记录总数
    pub fn cleanup(&self) -> usize {
        self.all()
            .into_iter()
            .map(|(name, limiter)| {
                let reclaimed = limiter.cleanup();
                if reclaimed > 0 {
                    tracing::debug!(limiter = name, reclaimed, "回收过期限流记录");
                }
                reclaimed
            })
            .sum()
    }
}
