mod support;

use serde_json::Value;
use support::{test_config, TestServer, BANNED_USER, INACTIVE_USER};
use tokio_tungstenite::{connect_async, tungstenite::client::IntoClientRequest};

/// 以伪造的转发头和 Bearer token 握手，返回 HTTP 状态码（101 表示升级成功）
async fn handshake_as(server: &TestServer, user: u64, forwarded_for: &str) -> u16 {
    let mut request = server.ws_url().into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert(
        "authorization",
        format!("Bearer {}", server.token(user)).parse().unwrap(),
    );
    headers.insert("x-forwarded-for", forwarded_for.parse().unwrap());
    headers.insert("x-real-ip", forwarded_for.parse().unwrap());

    match connect_async(request).await {
        Ok((_, response)) => response.status().as_u16(),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected handshake error: {other}"),
    }
}

#[tokio::test]
async fn plain_get_without_upgrade_headers_is_bad_request() {
    let server = TestServer::spawn().await;
    let token = server.token(1);

    let response = reqwest::Client::new()
        .get(server.http_url("/ws"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "BAD_UPGRADE");
    server.stop().await;
}

#[tokio::test]
async fn missing_or_invalid_token_is_unauthorized() {
    let server = TestServer::spawn().await;

    assert_eq!(server.reject_status(None, None).await, 401);
    assert_eq!(server.reject_status(Some("not-a-jwt"), None).await, 401);
    assert_eq!(server.state.hub.session_count().await, 0);
    server.stop().await;
}

#[tokio::test]
async fn foreign_origin_is_forbidden_before_anything_else() {
    let server = TestServer::spawn().await;
    let token = server.token(1);

    assert_eq!(
        server
            .reject_status(Some(&token), Some("http://evil.example"))
            .await,
        403
    );
    // 没有 token 时也先被 Origin 拦下
    assert_eq!(server.reject_status(None, Some("http://evil.example")).await, 403);
    server.stop().await;
}

#[tokio::test]
async fn allowed_origin_and_header_token_are_admitted() {
    let server = TestServer::spawn().await;

    let mut request = server.ws_url().into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("origin", "http://localhost:8080".parse().unwrap());
    headers.insert(
        "authorization",
        format!("Bearer {}", server.token(5)).parse().unwrap(),
    );

    let (mut ws, _) = connect_async(request).await.unwrap();
    let connected = support::next_frame(&mut ws).await;
    assert_eq!(connected["data"]["user_id"], 5);
    server.stop().await;
}

#[tokio::test]
async fn cookie_token_is_accepted() {
    let server = TestServer::spawn().await;

    let mut request = server.ws_url().into_client_request().unwrap();
    request.headers_mut().insert(
        "cookie",
        format!("lang=en; auth_token={}", server.token(8)).parse().unwrap(),
    );

    let (mut ws, _) = connect_async(request).await.unwrap();
    let connected = support::next_frame(&mut ws).await;
    assert_eq!(connected["data"]["user_id"], 8);
    server.stop().await;
}

#[tokio::test]
async fn banned_and_inactive_users_are_forbidden() {
    let server = TestServer::spawn().await;

    let banned = server.token(BANNED_USER);
    let inactive = server.token(INACTIVE_USER);
    assert_eq!(server.reject_status(Some(&banned), None).await, 403);
    assert_eq!(server.reject_status(Some(&inactive), None).await, 403);
    assert!(!server.state.hub.is_online(domain::UserId(BANNED_USER)).await);
    server.stop().await;
}

#[tokio::test]
async fn connection_rate_is_limited_per_ip() {
    let mut config = test_config();
    config.rate_limit.ws_connections_per_minute = 2;
    let server = TestServer::spawn_with(config).await;

    // 被拒绝的握手同样计入建连次数
    assert_eq!(server.reject_status(None, None).await, 401);
    assert_eq!(server.reject_status(None, None).await, 401);

    let token = server.token(1);
    let request = {
        let mut request = server.ws_url().into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        request
    };
    match connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 429);
            let retry_after: u64 = response.headers()["retry-after"]
                .to_str()
                .unwrap()
                .parse()
                .unwrap();
            assert!((1..=60).contains(&retry_after));
        }
        Err(other) => panic!("expected 429, got {other}"),
        Ok(_) => panic!("expected 429, handshake succeeded"),
    }
    server.stop().await;
}

#[tokio::test]
async fn forwarded_headers_from_untrusted_peers_do_not_reset_the_limit() {
    let mut config = test_config();
    config.rate_limit.ws_connections_per_minute = 2;
    let server = TestServer::spawn_with(config).await;

    let mut statuses = Vec::new();
    for i in 1..=5u64 {
        statuses.push(handshake_as(&server, i, &format!("10.0.0.{i}")).await);
    }
    assert_eq!(statuses, vec![101, 101, 429, 429, 429]);
    server.stop().await;
}

#[tokio::test]
async fn trusted_proxy_forwards_the_client_address() {
    let mut config = test_config();
    config.rate_limit.ws_connections_per_minute = 1;
    config.server.trusted_proxies = vec!["127.0.0.1".parse().unwrap()];
    let server = TestServer::spawn_with(config).await;

    // 每个转发地址各自计数
    assert_eq!(handshake_as(&server, 1, "203.0.113.1").await, 101);
    assert_eq!(handshake_as(&server, 2, "203.0.113.2").await, 101);
    assert_eq!(handshake_as(&server, 3, "203.0.113.1").await, 429);
    server.stop().await;
}
