//! WebSocket 升级入口
//!
//! 升级前依次做准入检查：Origin、升级头、每 IP 建连频率、token、用户状态。
//! 任一检查失败都在升级前以 HTTP 错误返回，不会创建会话。

use application::{rate_limiter::ws_key, UserStatus};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    client_ip::ClientIp,
    error::{ApiError, CORS_NOT_ALLOWED, USER_BANNED, USER_INACTIVE},
    state::AppState,
    ws_connection,
};

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    check_origin(&headers, &state.websocket.allowed_origins)?;

    let upgrade = upgrade.map_err(|rejection| {
        warn!(ip = %ip, reason = %rejection.body_text(), "非法的 WebSocket 升级请求");
        ApiError::bad_upgrade(rejection.body_text())
    })?;

    let key = ws_key(&ip);
    if !state.rate_limits.ws_connect.allow(&key) {
        let stats = state.rate_limits.ws_connect.stats(&key);
        warn!(ip = %ip, "WebSocket 建连过于频繁");
        return Err(ApiError::rate_limited(stats.retry_after_secs().max(1)));
    }

    let user_id = state
        .jwt_service
        .authenticate(&headers, query.token.as_deref())
        .inspect_err(|err| warn!(ip = %ip, code = err.code(), "WebSocket 认证失败"))?;

    match state.user_directory.status(user_id).await? {
        UserStatus::Active => {}
        UserStatus::Banned => {
            warn!(user_id = %user_id, "封禁用户尝试建连");
            return Err(ApiError::forbidden(USER_BANNED, "user is banned"));
        }
        UserStatus::Inactive => {
            return Err(ApiError::forbidden(USER_INACTIVE, "user is inactive"));
        }
    }

    let (session, queue) = state.hub.open_session(user_id)?;
    info!(user_id = %user_id, session_id = %session.id(), ip = %ip, "WebSocket 准入通过");

    let max_bytes = state.websocket.max_message_bytes;
    Ok(upgrade
        .max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| ws_connection::serve(socket, state, session, queue))
        .into_response())
}

/// 空 Origin（非浏览器客户端）放行；`*` 放行所有来源
fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Result<(), ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if origin.is_empty() || allowed.iter().any(|item| item == "*" || item == origin) {
        return Ok(());
    }

    warn!(origin = %origin, "Origin 不在白名单内");
    Err(ApiError::forbidden(
        CORS_NOT_ALLOWED,
        format!("origin {} is not allowed", origin),
    ))
}
