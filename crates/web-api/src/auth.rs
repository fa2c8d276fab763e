//! JWT 认证模块
//!
//! 提供 token 生成、验证，以及从请求中按优先级提取 token：
//! `Authorization: Bearer` 头、`?token=` 查询参数、`auth_token` Cookie。
//!
//! 服务间接口不接受用户 token，改用 `X-Internal-Api-Key` 头携带的内部密钥。

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, INTERNAL_ONLY},
    state::AppState,
};

pub const AUTH_COOKIE: &str = "auth_token";
pub const INTERNAL_KEY_HEADER: &str = "x-internal-api-key";

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务，HS256 签名
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        self.encode_claims(&Claims {
            user_id: user_id.0,
            exp: exp.timestamp(),
        })
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("token generation failed: {}", err))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::invalid_token(format!("invalid token: {}", err)))?;

        if claims.user_id == 0 {
            return Err(ApiError::invalid_token("token carries no user"));
        }
        Ok(claims)
    }

    /// 从请求中提取并验证 token，返回用户 ID
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<UserId, ApiError> {
        let token = extract_token(headers, query_token).ok_or_else(ApiError::missing_token)?;
        let claims = self.verify_token(&token)?;
        Ok(UserId(claims.user_id))
    }
}

/// 按 Bearer 头、查询参数、Cookie 的顺序取第一个非空 token
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    bearer_token(headers)
        .or_else(|| query_token.filter(|token| !token.is_empty()))
        .or_else(|| cookie_token(headers))
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, token)| token)
        .filter(|token| !token.is_empty())
}

/// 已通过 Bearer 认证的调用方
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(ApiError::missing_token)?;
        let claims = state.jwt_service.verify_token(token)?;
        Ok(AuthUser(UserId(claims.user_id)))
    }
}

/// 持有内部密钥的服务调用方
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.internal_api_key.as_deref() else {
            return Err(ApiError::forbidden(INTERNAL_ONLY, "internal api is disabled"));
        };

        let presented = parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        match presented {
            Some(key) if keys_match(key, expected) => Ok(InternalCaller),
            _ => Err(ApiError::forbidden(
                INTERNAL_ONLY,
                "a valid internal api key is required",
            )),
        }
    }
}

/// 比较耗时与首个不同字节的位置无关
fn keys_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn test_token_roundtrip() {
        let jwt = service();
        let token = jwt.generate_token(UserId(42)).unwrap();
        assert_eq!(jwt.verify_token(&token).unwrap().user_id, 42);
    }

    #[test]
    fn test_expired_and_foreign_tokens_are_rejected() {
        let jwt = service();
        let expired = jwt
            .encode_claims(&Claims {
                user_id: 1,
                exp: chrono::Utc::now().timestamp() - 3600,
            })
            .unwrap();
        let err = jwt.verify_token(&expired).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), crate::error::INVALID_TOKEN);

        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-at-least-32-chars".to_string(),
            expiration_hours: 1,
        });
        let token = other.generate_token(UserId(1)).unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }

    #[test]
    fn test_token_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=cookie"));
        assert_eq!(extract_token(&headers, None).as_deref(), Some("cookie"));
        assert_eq!(extract_token(&headers, Some("query")).as_deref(), Some("query"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header"));
        assert_eq!(extract_token(&headers, Some("query")).as_deref(), Some("header"));

        assert_eq!(extract_token(&HeaderMap::new(), Some("")), None);
    }

    #[test]
    fn test_authenticate_without_token() {
        let err = service().authenticate(&HeaderMap::new(), None).unwrap_err();
        assert_eq!(err.code(), crate::error::MISSING_TOKEN);
    }

    #[test]
    fn test_internal_key_comparison() {
        assert!(keys_match("same-key", "same-key"));
        assert!(!keys_match("same-kez", "same-key"));
        assert!(!keys_match("same-key-longer", "same-key"));
        assert!(!keys_match("", "same-key"));
    }
}
