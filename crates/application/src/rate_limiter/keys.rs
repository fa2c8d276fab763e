//! 限流 key 生成函数
//!
//! 同一个限流器实现通过不同的 key 函数服务于 IP、用户、路由等不同维度。

use domain::UserId;

pub fn ip_key(ip: &str) -> String {
    ip.to_string()
}

pub fn login_key(ip: &str) -> String {
    format!("login:{}", ip)
}

pub fn register_key(ip: &str) -> String {
    format!("register:{}", ip)
}

pub fn ws_key(ip: &str) -> String {
    format!("ws:{}", ip)
}

pub fn user_key(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

/// 已认证请求按用户计数，否则退回到 IP
pub fn user_or_ip_key(user_id: Option<UserId>, ip: &str) -> String {
    match user_id {
        Some(user_id) => user_key(user_id),
        None => format!("ip:{}", ip),
    }
}

pub fn route_key(ip: &str, method: &str, path: &str) -> String {
    format!("{}:{}:{}", ip, method, path)
}
