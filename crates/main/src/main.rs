//! 主应用程序入口
//!
//! 加载配置、初始化日志、装配推送中心并启动 Axum 服务。
//! 退出码：0 正常结束，1 启动失败，130 收到信号后关闭。

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use application::{Clock, SystemClock};
use config::{AppConfig, LogFormat, LoggingConfig};
use infrastructure::{spawn_rate_limit_cleanup, Infrastructure};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_SIGNAL: u8 = 130;

/// 服务停止的原因
enum Stopped {
    Clean,
    Signal(&'static str),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            init_tracing(&LoggingConfig::default());
            error!(error = %err, "配置加载失败");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };
    init_tracing(&config.logging);

    match run(config).await {
        Ok(Stopped::Clean) => ExitCode::SUCCESS,
        Ok(Stopped::Signal(signal)) => {
            info!(signal, "服务已关闭");
            ExitCode::from(EXIT_SIGNAL)
        }
        Err(err) => {
            error!(error = ?err, "服务启动失败");
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

/// `RUST_LOG` 优先，否则使用配置中的级别
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<Stopped> {
    if config.uses_development_secret() {
        warn!("正在使用开发环境 JWT 密钥，部署前请通过 APP_JWT__SECRET 覆盖");
    }
    info!(config = %config.sanitize(), "配置已加载");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let infrastructure = Infrastructure::in_memory(&config);
    let state =
        AppState::build(&config, &infrastructure, clock).context("failed to assemble hub")?;
    let hub = state.hub.clone();

    let (cleanup_tx, cleanup_rx) = watch::channel(false);
    let cleanup = spawn_rate_limit_cleanup(
        state.rate_limits.clone(),
        config.rate_limit.cleanup_interval(),
        cleanup_rx,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "实时推送服务已启动");

    let received = Arc::new(OnceLock::new());
    let graceful = {
        let hub = hub.clone();
        let received = received.clone();
        async move {
            let signal = shutdown_signal().await;
            let _ = received.set(signal);
            info!(signal, "收到退出信号，开始优雅关闭");
            // 长连接在会话关闭前不会结束
            hub.shutdown().await;
        }
    };

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .await
    .context("server error")?;

    hub.shutdown().await;
    let _ = cleanup_tx.send(true);
    if let Err(err) = cleanup.await {
        warn!(error = %err, "限流清理任务异常退出");
    }

    Ok(match received.get() {
        Some(signal) => Stopped::Signal(*signal),
        None => Stopped::Clean,
    })
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
