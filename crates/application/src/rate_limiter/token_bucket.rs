use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::TimeDelta;
use domain::Timestamp;

use super::{elapsed_secs, to_delta, RateLimitError, RateLimitStats, RateLimiter};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: u32,
    last_refill: Timestamp,
}

/// 令牌桶限流器
///
/// 每次判定前补充 `floor(elapsed * rate)` 个令牌（不超过容量），再尝试消耗一个。
pub struct TokenBucketLimiter {
    capacity: u32,
    /// 每秒补充的令牌数
    refill_rate: f64,
    /// 未出现过的 key 在统计中使用的恢复窗口
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(
        capacity: u32,
        refill_rate: f64,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidConfig(
                "token bucket capacity must be positive".to_string(),
            ));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(RateLimitError::InvalidConfig(
                "token bucket refill rate must be positive".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            refill_rate,
            window: to_delta(window)?,
            clock,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// 以“每个窗口补充多少令牌”的形式构造，例如 30 个 / 分钟
    pub fn per_window(
        capacity: u32,
        tokens_per_window: u32,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "token bucket window must be positive".to_string(),
            ));
        }
        let rate = f64::from(tokens_per_window) / window.as_secs_f64();
        Self::new(capacity, rate, window, clock)
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill_amount(&self, bucket: &Bucket, now: Timestamp) -> u32 {
        let earned = (elapsed_secs(bucket.last_refill, now) * self.refill_rate).floor();
        if earned >= f64::from(self.capacity) {
            self.capacity
        } else {
            earned as u32
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Timestamp) {
        let added = self.refill_amount(bucket, now);
        if added == 0 {
            return;
        }

        bucket.tokens = bucket.tokens.saturating_add(added).min(self.capacity);
        if bucket.tokens == self.capacity {
            bucket.last_refill = now;
        } else {
            // 只推进已兑换成令牌的那部分时间，保留零头
            let spent = f64::from(added) / self.refill_rate;
            bucket.last_refill += TimeDelta::microseconds((spent * 1_000_000.0) as i64);
        }
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_rate)
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        self.refill(bucket, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn stats(&self, key: &str) -> RateLimitStats {
        let now = self.clock.now();
        let buckets = self.lock();

        let Some(bucket) = buckets.get(key) else {
            return RateLimitStats {
                used: 0,
                remaining: self.capacity,
                limit: self.capacity,
                reset_time: now + self.window,
                retry_after: Duration::ZERO,
            };
        };

        let earned = self.refill_amount(bucket, now);
        let tokens = bucket.tokens.saturating_add(earned).min(self.capacity);
        let missing = self.capacity - tokens;
        // 尚未兑换成令牌的零头时间同样计入恢复进度
        let carried =
            elapsed_secs(bucket.last_refill, now) - f64::from(earned) / self.refill_rate;
        let until_full = (f64::from(missing) / self.refill_rate - carried.max(0.0)).max(0.0);

        RateLimitStats {
            used: missing,
            remaining: tokens,
            limit: self.capacity,
            reset_time: now + TimeDelta::microseconds((until_full * 1_000_000.0) as i64),
            retry_after: if tokens == 0 {
                self.retry_interval()
            } else {
                Duration::ZERO
            },
        }
    }

    fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.lock();
        let before = buckets.len();
        // 补满后的桶与新建的桶行为一致，可以安全丢弃
        buckets.retain(|_, bucket| {
            bucket.tokens.saturating_add(self.refill_amount(bucket, now)) < self.capacity
        });
        before - buckets.len()
    }

    fn limit(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(capacity: u32, rate: f64) -> (TokenBucketLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter =
            TokenBucketLimiter::new(capacity, rate, Duration::from_secs(60), clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_burst_then_refill() {
        let (limiter, clock) = limiter(2, 1.0);

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.advance(Duration::from_millis(1100));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(1, 1.0);
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_fractional_progress_is_kept() {
        // 0.5 令牌/秒：每秒调用一次，两秒内必须能拿到一个令牌
        let (limiter, clock) = limiter(1, 0.5);
        assert!(limiter.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_stats_and_retry_after() {
        let (limiter, _clock) = limiter(2, 0.5);
        let fresh = limiter.stats("k");
        assert_eq!(fresh.used, 0);
        assert_eq!(fresh.remaining, 2);

        limiter.allow("k");
        limiter.allow("k");
        let stats = limiter.stats("k");
        assert_eq!(stats.used, 2);
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.retry_after, Duration::from_secs(2));
        assert!(matches!(
            limiter.check("k"),
            Err(RateLimitError::Exceeded { .. })
        ));
    }

    #[test]
    fn test_reset_time_counts_partial_refill() {
        // 每 2 秒一个令牌，耗尽后 1 秒：还差 3 秒补满
        let (limiter, clock) = limiter(2, 0.5);
        let start = clock.now();
        limiter.allow("k");
        limiter.allow("k");
        clock.advance(Duration::from_secs(1));

        let stats = limiter.stats("k");
        assert_eq!(stats.used, 2);
        assert_eq!(stats.reset_time, start + TimeDelta::seconds(4));

        clock.advance(Duration::from_secs(2));
        let stats = limiter.stats("k");
        assert_eq!(stats.remaining, 1);
        assert_eq!(stats.reset_time, start + TimeDelta::seconds(4));
    }

    #[test]
    fn test_reset_restores_capacity() {
        let (limiter, _clock) = limiter(1, 1.0);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        limiter.reset("k");
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_cleanup_only_drops_full_buckets() {
        let (limiter, clock) = limiter(2, 1.0);
        limiter.allow("busy");
        limiter.allow("busy");
        assert_eq!(limiter.cleanup(), 0);

        clock.advance(Duration::from_secs(1));
        // 只补回 1 个令牌，仍会影响判定
        assert_eq!(limiter.cleanup(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.cleanup(), 1);
        assert!(limiter.allow("busy"));
        assert!(limiter.allow("busy"));
        assert!(!limiter.allow("busy"));
    }

    #[test]
    fn test_invalid_configuration() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        assert!(TokenBucketLimiter::new(0, 1.0, Duration::from_secs(1), clock.clone()).is_err());
        assert!(TokenBucketLimiter::new(1, 0.0, Duration::from_secs(1), clock.clone()).is_err());
        assert!(TokenBucketLimiter::per_window(1, 1, Duration::ZERO, clock).is_err());
    }

    #[test]
    fn test_per_window_rate() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let limiter =
            TokenBucketLimiter::per_window(30, 30, Duration::from_secs(60), clock).unwrap();
        assert!((limiter.refill_rate() - 0.5).abs() < f64::EPSILON);
    }
}
