use application::{
    rate_limiter::{user_key, ws_key},
    Clock, ManualClock, RateLimitError, RateLimitPresets, RateLimiter, SlidingWindowLimiter,
    TokenBucketLimiter,
};
use config::RateLimitConfig;
use domain::UserId;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::default())
}

#[tokio::test]
async fn test_concurrent_allow_admits_exactly_capacity() {
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(TokenBucketLimiter::new(5, 1.0, Duration::from_secs(60), clock()).unwrap());

    let tasks = (0..50).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.allow("user:1") })
    });
    let admitted = join_all(tasks)
        .await
        .into_iter()
        .filter(|result| *result.as_ref().unwrap())
        .count();

    assert_eq!(admitted, 5);
}

/// 任意长度为 window 的区间内准入次数不超过 limit，清理不改变判定结果
#[test]
fn test_sliding_window_bound_holds_across_cleanup() {
    let clock = clock();
    let limiter = SlidingWindowLimiter::new(4, Duration::from_secs(10), clock.clone()).unwrap();
    let reference =
        SlidingWindowLimiter::new(4, Duration::from_secs(10), clock.clone()).unwrap();

    let mut admissions = Vec::new();
    for step in 0..120u64 {
        let allowed = limiter.allow("k");
        assert_eq!(allowed, reference.allow("k"), "step {}", step);
        if allowed {
            admissions.push(clock.now());
        }
        if step % 7 == 0 {
            limiter.cleanup();
        }
        clock.advance(Duration::from_millis(700));
    }

    for (i, start) in admissions.iter().enumerate() {
        let in_window = admissions[i..]
            .iter()
            .take_while(|t| (**t - *start) < chrono::TimeDelta::seconds(10))
            .count();
        assert!(in_window <= 4);
    }
}

#[test]
fn test_token_bucket_cleanup_is_invisible() {
    let clock = clock();
    let limiter = TokenBucketLimiter::new(3, 0.5, Duration::from_secs(60), clock.clone()).unwrap();
    let reference = TokenBucketLimiter::new(3, 0.5, Duration::from_secs(60), clock.clone()).unwrap();

    for step in 0..200u64 {
        let key = format!("k{}", step % 3);
        assert_eq!(limiter.allow(&key), reference.allow(&key), "step {}", step);
        limiter.cleanup();
        clock.advance(Duration::from_millis(if step % 10 == 0 { 9_000 } else { 300 }));
    }
}

#[test]
fn test_presets_follow_configuration() {
    let clock = clock();
    let config = RateLimitConfig {
        ws_connections_per_minute: 2,
        ..RateLimitConfig::default()
    };
    let presets = RateLimitPresets::new(&config, clock.clone()).unwrap();

    let key = ws_key("10.0.0.1");
    assert!(presets.ws_connect.allow(&key));
    assert!(presets.ws_connect.allow(&key));
    assert!(matches!(
        presets.ws_connect.check(&key),
        Err(RateLimitError::Exceeded { .. })
    ));

    let chat_key = user_key(UserId(7));
    for _ in 0..30 {
        assert!(presets.chat_message.allow(&chat_key));
    }
    assert!(!presets.chat_message.allow(&chat_key));

    // 30 个 / 分钟：两秒补一个
    clock.advance(Duration::from_secs(2));
    assert!(presets.chat_message.allow(&chat_key));
    assert!(!presets.chat_message.allow(&chat_key));
}
