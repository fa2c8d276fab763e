//! HTTP 限流中间件
//!
//! 按客户端 IP 对 API 请求限流，并在每个响应上附带
//! `X-RateLimit-Limit` / `X-RateLimit-Remaining` / `X-RateLimit-Reset` 头。

use application::rate_limiter::{ip_key, RateLimitStats};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::{client_ip::ClientIp, error::ApiError, state::AppState};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub async fn api_rate_limit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.rate_limits.api;
    let key = ip_key(&ip);

    let allowed = limiter.allow(&key);
    let stats = limiter.stats(&key);
    let mut response = if allowed {
        next.run(request).await
    } else {
        warn!(ip = %ip, path = %request.uri().path(), "API 请求被限流");
        ApiError::rate_limited(stats.retry_after_secs().max(1)).into_response()
    };

    apply_headers(response.headers_mut(), &stats);
    response
}

pub fn apply_headers(headers: &mut HeaderMap, stats: &RateLimitStats) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(stats.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(stats.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(stats.reset_unix()));
}
