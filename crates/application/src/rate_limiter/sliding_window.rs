use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::TimeDelta;
use domain::Timestamp;

use super::{to_delta, RateLimitError, RateLimitStats, RateLimiter};
use crate::clock::Clock;

/// 滑动窗口限流器
///
/// 每个 key 保存窗口内的准入时间戳；任意长度为 `window` 的区间内最多准入 `limit` 次。
pub struct SlidingWindowLimiter {
    limit: u32,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<Timestamp>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::InvalidConfig(
                "sliding window limit must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "sliding window width must be positive".to_string(),
            ));
        }

        Ok(Self {
            limit,
            window: to_delta(window)?,
            clock,
            windows: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Timestamp>>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 丢弃早于 `cutoff`（含）的时间戳，时间戳按准入顺序单调递增
fn evict_expired(requests: &mut VecDeque<Timestamp>, cutoff: Timestamp) {
    while requests.front().is_some_and(|oldest| *oldest <= cutoff) {
        requests.pop_front();
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.window;
        let mut windows = self.lock();
        let requests = windows.entry(key.to_string()).or_default();

        evict_expired(requests, cutoff);

        if requests.len() < self.limit as usize {
            requests.push_back(now);
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
        let cutoff = now - self.window;
        let windows = self.lock();

        let mut live = windows
            .get(key)
            .into_iter()
            .flatten()
            .filter(|timestamp| **timestamp > cutoff)
            .copied()
            .peekable();

        let Some(oldest) = live.peek().copied() else {
            return RateLimitStats {
                used: 0,
                remaining: self.limit,
                limit: self.limit,
                reset_time: now + self.window,
                retry_after: Duration::ZERO,
            };
        };

        let used = u32::try_from(live.count()).unwrap_or(u32::MAX);
        let reset_time = oldest + self.window;

        RateLimitStats {
            used,
            remaining: self.limit.saturating_sub(used),
            limit: self.limit,
            reset_time,
            retry_after: (reset_time - now).to_std().unwrap_or(Duration::ZERO),
        }
    }

    fn cleanup(&self) -> usize {
        let cutoff = self.clock.now() - self.window;
        let mut windows = self.lock();
        let before = windows.len();
        // 窗口内没有任何时间戳的记录等价于不存在
        windows.retain(|_, requests| requests.back().is_some_and(|newest| *newest > cutoff));
        before - windows.len()
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window_secs: u64) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter =
            SlidingWindowLimiter::new(limit, Duration::from_secs(window_secs), clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_window_admits_limit_then_denies() {
        let (limiter, clock) = limiter(3, 60);
        let mut results = Vec::new();
        for _ in 0..5 {
            results.push(limiter.allow("k"));
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(results, vec![true, true, true, false, false]);

        // t = 61
        clock.advance(Duration::from_secs(56));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_stats_report_oldest_plus_window() {
        let (limiter, clock) = limiter(2, 60);
        let start = clock.now();
        limiter.allow("k");
        clock.advance(Duration::from_secs(10));
        limiter.allow("k");

        let stats = limiter.stats("k");
        assert_eq!(stats.used, 2);
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.limit, 2);
        assert_eq!(stats.reset_time, start + TimeDelta::seconds(60));
        assert_eq!(stats.retry_after, Duration::from_secs(50));
    }

    #[test]
    fn test_stats_for_unknown_key() {
        let (limiter, _clock) = limiter(5, 60);
        let stats = limiter.stats("nobody");
        assert_eq!(stats.used, 0);
        assert_eq!(stats.remaining, 5);
        assert_eq!(stats.retry_after, Duration::ZERO);
    }

    #[test]
    fn test_denied_calls_are_not_recorded() {
        let (limiter, clock) = limiter(1, 10);
        assert!(limiter.allow("k"));
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            assert!(!limiter.allow("k"));
        }
        clock.advance(Duration::from_secs(5));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_cleanup_keeps_live_windows() {
        let (limiter, clock) = limiter(2, 60);
        limiter.allow("old");
        clock.advance(Duration::from_secs(30));
        limiter.allow("new");
        clock.advance(Duration::from_secs(31));

        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.stats("new").used, 1);
        assert!(limiter.allow("new"));
        assert!(!limiter.allow("new"));
    }

    #[test]
    fn test_reset() {
        let (limiter, _clock) = limiter(1, 60);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        limiter.reset("k");
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_concurrent_allow_never_exceeds_limit() {
        let clock = Arc::new(ManualClock::default());
        let limiter = Arc::new(
            SlidingWindowLimiter::new(10, Duration::from_secs(60), clock).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.allow("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
