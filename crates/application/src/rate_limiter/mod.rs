//! 限流器
//!
//! 以调用方提供的 key 为单位做准入判定，支持令牌桶和滑动窗口两种策略。
//! 两种实现都用一把限流器级别的锁保护内部状态，保证同一 key 上的并发
//! `allow` 不会在只剩一个名额时同时成功。

mod keys;
mod presets;
mod sliding_window;
mod token_bucket;

use std::time::Duration;

use chrono::TimeDelta;
use domain::Timestamp;

pub use keys::{ip_key, login_key, register_key, route_key, user_key, user_or_ip_key, ws_key};
pub use presets::RateLimitPresets;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// 某个 key 的只读限流快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// 当前窗口内已使用的名额
    pub used: u32,
    /// 剩余名额
    pub remaining: u32,
    /// 名额上限（令牌桶为容量）
    pub limit: u32,
    /// 名额完全恢复的时间点
    pub reset_time: Timestamp,
    /// 建议的重试等待时间
    pub retry_after: Duration,
}

impl RateLimitStats {
    pub fn reset_unix(&self) -> i64 {
        self.reset_time.timestamp()
    }

    /// 向上取整到秒，用于 `Retry-After` 头
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {key}, retry after {retry_after:?}")]
    Exceeded { key: String, retry_after: Duration },

    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfig(String),
}

/// 限流策略的统一接口
pub trait RateLimiter: Send + Sync {
    /// 判定 key 对应的动作现在能否执行；允许时同时记录本次准入
    fn allow(&self, key: &str) -> bool;

    /// 丢弃 key 的全部状态，下一次调用视为首次出现
    fn reset(&self, key: &str);

    fn stats(&self, key: &str) -> RateLimitStats;

    /// 回收不再影响任何后续判定的记录，返回回收数量
    fn cleanup(&self) -> usize;

    fn limit(&self) -> u32;

    /// `allow` 的错误形式，拒绝时携带重试时间
    fn check(&self, key: &str) -> Result<(), RateLimitError> {
        if self.allow(key) {
            Ok(())
        } else {
            Err(RateLimitError::Exceeded {
                key: key.to_string(),
                retry_after: self.stats(key).retry_after,
            })
        }
    }
}

pub(crate) fn to_delta(duration: Duration) -> Result<TimeDelta, RateLimitError> {
    TimeDelta::from_std(duration)
        .map_err(|_| RateLimitError::InvalidConfig(format!("duration {:?} out of range", duration)))
}

/// 时间差转为秒，时钟回拨时按 0 处理
pub(crate) fn elapsed_secs(from: Timestamp, to: Timestamp) -> f64 {
    (to - from).to_std().map(|d| d.as_secs_f64()).unwrap_or(0.0)
}
