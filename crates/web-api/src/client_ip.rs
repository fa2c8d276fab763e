use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

use crate::state::AppState;

/// 请求方 IP，用作限流 key
///
/// 默认取 TCP 对端地址。只有对端是可信代理时才采信转发头：
/// `X-Forwarded-For` 从右向左第一个非可信代理地址，其次 `X-Real-IP`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(resolve(&parts.headers, peer, &state.trusted_proxies)))
    }
}

pub fn resolve(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    forwarded_for(headers, trusted_proxies)
        .or_else(|| real_ip(headers))
        .unwrap_or(peer)
        .to_string()
}

fn forwarded_for(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect();

    hops.into_iter()
        .rev()
        .filter_map(|hop| hop.parse::<IpAddr>().ok())
        .find(|ip| !trusted_proxies.contains(ip))
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn spoofed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 70.41.3.18"),
        );
        headers
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let peer: SocketAddr = "198.51.100.4:5000".parse().unwrap();
        assert_eq!(resolve(&HeaderMap::new(), None, &[]), "unknown");
        assert_eq!(resolve(&spoofed_headers(), Some(peer), &[]), "198.51.100.4");

        let proxy: IpAddr = "10.0.0.9".parse().unwrap();
        assert_eq!(resolve(&spoofed_headers(), Some(peer), &[proxy]), "198.51.100.4");
    }

    #[test]
    fn test_trusted_proxy_resolution_order() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let proxy = peer.ip();
        let edge: IpAddr = "70.41.3.18".parse().unwrap();

        // 最右侧的非可信地址才是真实客户端
        assert_eq!(resolve(&spoofed_headers(), Some(peer), &[proxy]), "70.41.3.18");
        assert_eq!(
            resolve(&spoofed_headers(), Some(peer), &[proxy, edge]),
            "203.0.113.7"
        );

        let mut headers = HeaderMap::new();
        assert_eq!(resolve(&headers, Some(peer), &[proxy]), "10.0.0.9");
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        assert_eq!(resolve(&headers, Some(peer), &[proxy]), "192.168.1.2");
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(resolve(&headers, Some(peer), &[proxy]), "192.168.1.2");
    }
}
