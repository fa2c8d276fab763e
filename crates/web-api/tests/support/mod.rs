#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::SystemClock;
use config::{AppConfig, JwtConfig, UserStatusConfig};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use infrastructure::Infrastructure;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const BANNED_USER: u64 = 666;
pub const INACTIVE_USER: u64 = 777;
pub const INTERNAL_KEY: &str = "integration-internal-key-with-32-plus-chars";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.jwt = JwtConfig {
        secret: "integration-test-secret-with-32-plus-chars".to_string(),
        expiration_hours: 1,
    };
    config.users = UserStatusConfig {
        banned: vec![BANNED_USER],
        inactive: vec![INACTIVE_USER],
    };
    config.rate_limit.ws_connections_per_minute = 100;
    config.server.internal_api_key = Some(INTERNAL_KEY.to_string());
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: AppConfig) -> Self {
        let infrastructure = Infrastructure::in_memory(&config);
        let state = AppState::build(&config, &infrastructure, Arc::new(SystemClock))
            .expect("build app state");
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("server error");
        });

        Self {
            addr,
            state,
            jwt: JwtService::new(config.jwt.clone()),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn token(&self, user_id: u64) -> String {
        self.jwt.generate_token(UserId(user_id)).expect("generate token")
    }

    /// 以查询参数携带 token 建立连接，并读取 connected 帧
    pub async fn connect(&self, user_id: u64) -> (WsStream, Value) {
        let url = format!("{}?token={}", self.ws_url(), self.token(user_id));
        let (mut ws, _) = connect_async(url).await.expect("websocket handshake");
        let connected = next_frame(&mut ws).await;
        assert_eq!(connected["type"], "connected");
        (ws, connected)
    }

    /// 返回握手失败时的 HTTP 状态码
    pub async fn reject_status(&self, token: Option<&str>, origin: Option<&str>) -> u16 {
        let mut request = self.ws_url().into_client_request().expect("client request");
        if let Some(token) = token {
            request.headers_mut().insert(
                "authorization",
                HeaderValue::from_str(&format!("Bearer {}", token)).expect("header"),
            );
        }
        if let Some(origin) = origin {
            request
                .headers_mut()
                .insert("origin", HeaderValue::from_str(origin).expect("header"));
        }

        match connect_async(request).await {
            Ok(_) => panic!("handshake unexpectedly succeeded"),
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(other) => panic!("unexpected handshake error: {other}"),
        }
    }

    /// 先关闭推送中心让会话退出，再停止 HTTP 服务
    pub async fn stop(mut self) {
        self.state.hub.shutdown().await;
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_frame(ws: &mut WsStream, kind: &str, data: Value) {
    let text = json!({ "type": kind, "data": data }).to_string();
    ws.send(Message::Text(text.into())).await.expect("send frame");
}

/// 读取下一条文本帧，跳过控制帧
pub async fn next_frame(ws: &mut WsStream) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).expect("json frame")
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("connection ended while waiting for a frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// 读到指定类型的帧为止，其它帧丢弃
pub async fn next_frame_of(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// 等待服务端关闭连接
pub async fn expect_closed(ws: &mut WsStream) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server did not close the connection");
}

/// 轮询直到条件满足或超时
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
