//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级入口（含准入检查）、会话读写循环、
//! HTTP 限流中间件，以及供内部服务查询在线状态、投递事件的少量接口。

mod auth;
mod client_ip;
mod error;
mod rate_limit;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use auth::{
    extract_token, AuthUser, Claims, InternalCaller, JwtService, AUTH_COOKIE, INTERNAL_KEY_HEADER,
};
pub use client_ip::ClientIp;
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use rate_limit::{LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER};
pub use routes::{
    router, EventAccepted, HealthResponse, OnlineUsersResponse, RoomMembersResponse,
    UserOnlineResponse,
};
pub use state::AppState;
