use std::time::Duration;

use application::RateLimitPresets;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// 周期回收限流记录，收到关闭信号（值变为 true 或发送端被丢弃）后退出
pub fn spawn_rate_limit_cleanup(
    presets: RateLimitPresets,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reclaimed = presets.cleanup();
                    debug!(reclaimed, "限流记录清理完成");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("限流清理任务已停止");
    })
}
