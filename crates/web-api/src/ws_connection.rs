use std::sync::Arc;
use std::time::Duration;

use application::{
    ApplicationError, ChatDispatcher, HubError, OutboundQueue, SessionHandle, WeakHub,
};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use domain::Frame;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// 单个会话的超时参数
#[derive(Debug, Clone, Copy)]
struct Timeouts {
    pong_wait: Duration,
    ping_period: Duration,
    write_wait: Duration,
}

/// 运行一个已升级的连接：注册会话，并发运行读写循环，任一结束后注销
///
/// 会话只持有推送中心的弱引用，推送中心先被释放时跳过注销。
pub async fn serve(
    socket: WebSocket,
    state: AppState,
    session: Arc<SessionHandle>,
    queue: OutboundQueue,
) {
    let hub = state.hub.downgrade();
    let dispatcher = state.dispatcher.clone();
    let timeouts = Timeouts {
        pong_wait: state.websocket.pong_wait(),
        ping_period: state.websocket.ping_period(),
        write_wait: state.websocket.write_wait(),
    };
    let max_protocol_errors = state.websocket.max_protocol_errors;
    drop(state);

    let (sink, stream) = socket.split();
    if let Some(hub) = hub.upgrade() {
        if let Err(err) = hub.register(session.clone()).await {
            warn!(user_id = %session.user_id(), error = %err, "会话注册失败");
            let mut sink = sink;
            let _ = sink
                .send(close_message(close_code::AWAY, "server shutting down"))
                .await;
            return;
        }
    } else {
        return;
    }

    let mut write_task = tokio::spawn(write_loop(sink, queue, session.clone(), timeouts));
    let mut read_task = tokio::spawn(read_loop(
        stream,
        session.clone(),
        dispatcher,
        timeouts.pong_wait,
        max_protocol_errors,
    ));

    let write_finished = tokio::select! {
        _ = &mut read_task => false,
        _ = &mut write_task => true,
    };

    unregister(&hub, &session).await;

    if write_finished {
        read_task.abort();
    } else if timeout(timeouts.write_wait, &mut write_task).await.is_err() {
        write_task.abort();
    }

    info!(user_id = %session.user_id(), session_id = %session.id(), "WebSocket 连接已关闭");
}

async fn unregister(hub: &WeakHub, session: &SessionHandle) {
    match hub.upgrade() {
        Some(hub) => {
            hub.unregister(session).await;
        }
        None => {
            session.close();
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: Arc<SessionHandle>,
    dispatcher: Arc<ChatDispatcher>,
    pong_wait: Duration,
    max_protocol_errors: u32,
) {
    let mut protocol_errors = 0u32;

    loop {
        let message = match timeout(pong_wait, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                debug!(session_id = %session.id(), error = %err, "读取失败");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(user_id = %session.user_id(), session_id = %session.id(), "读超时，连接判定失活");
                break;
            }
        };

        // 任何入站流量都说明连接存活
        session.record_pong();

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(_) => {
                protocol_errors += 1;
                warn!(session_id = %session.id(), protocol_errors, "不支持二进制帧");
                if protocol_errors >= max_protocol_errors {
                    break;
                }
                continue;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        let result = match Frame::from_json(text.as_str()) {
            Ok(frame) => dispatcher.handle_frame(&session, frame).await,
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(()) => protocol_errors = 0,
            Err(ApplicationError::Hub(HubError::ShutDown)) => break,
            Err(ApplicationError::Domain(err)) => {
                protocol_errors += 1;
                warn!(
                    user_id = %session.user_id(),
                    session_id = %session.id(),
                    protocol_errors,
                    error = %err,
                    "丢弃无法解析的帧"
                );
                if protocol_errors >= max_protocol_errors {
                    warn!(session_id = %session.id(), "协议错误过多，关闭会话");
                    break;
                }
            }
            Err(err) => {
                error!(user_id = %session.user_id(), error = %err, "处理上行帧失败");
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: OutboundQueue,
    session: Arc<SessionHandle>,
    timeouts: Timeouts,
) {
    let mut ticker = interval_at(Instant::now() + timeouts.ping_period, timeouts.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    // 队列已关闭：发送关闭帧后退出
                    let _ = send_with_deadline(
                        &mut sink,
                        close_message(close_code::NORMAL, ""),
                        timeouts.write_wait,
                    )
                    .await;
                    break;
                };

                let message = Message::Text(frame.to_string().into());
                if let Err(err) = send_with_deadline(&mut sink, message, timeouts.write_wait).await {
                    error!(session_id = %session.id(), error = %err, "写入失败");
                    break;
                }
            }
            _ = ticker.tick() => {
                if session.since_last_pong() > timeouts.pong_wait {
                    warn!(user_id = %session.user_id(), session_id = %session.id(), "等待 pong 超时");
                    break;
                }
                if let Err(err) = send_with_deadline(&mut sink, Message::Ping(Default::default()), timeouts.write_wait).await {
                    error!(session_id = %session.id(), error = %err, "发送 ping 失败");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn send_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), String> {
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("write deadline of {:?} exceeded", write_wait)),
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
