//! 统一配置中心
//!
//! 提供实时推送中心的全局配置管理，包括：
//! - HTTP 监听地址
//! - WebSocket 会话参数（队列容量、心跳、写超时）
//! - JWT认证
//! - 限流预设
//! - 日志输出
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> 环境变量（`APP_*`，`__` 表示嵌套）。

use std::net::IpAddr;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 服务配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// WebSocket 会话配置
    #[validate(nested)]
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// JWT认证配置
    #[validate(nested)]
    pub jwt: JwtConfig,
    /// 限流配置
    #[validate(nested)]
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 静态用户状态（封禁 / 停用）
    #[serde(default)]
    pub users: UserStatusConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    /// 可信反向代理地址，只有来自这些地址的连接才采信 `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    /// 内部服务投递事件所用的密钥；未配置时事件接口拒绝所有请求
    #[serde(default)]
    #[validate(length(min = 32))]
    pub internal_api_key: Option<String>,
}

/// WebSocket 会话配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebSocketConfig {
    /// 允许的 Origin 列表，空 Origin（非浏览器客户端）始终放行
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 每个会话的发送队列容量
    #[validate(range(min = 1))]
    pub send_queue_capacity: usize,
    /// 单条入站消息的最大字节数
    #[validate(range(min = 64))]
    pub max_message_bytes: usize,
    #[validate(range(min = 2))]
    pub pong_wait_secs: u64,
    #[validate(range(min = 1))]
    pub write_wait_secs: u64,
    /// 连续解码失败多少次后关闭会话
    #[validate(range(min = 1))]
    pub max_protocol_errors: u32,
}

impl WebSocketConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// 心跳周期固定为 pong_wait 的 9/10，保证半开连接在 pong_wait 内被发现
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:8080".to_string()],
            send_queue_capacity: 256,
            max_message_bytes: 512,
            pong_wait_secs: 60,
            write_wait_secs: 10,
            max_protocol_errors: 3,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 32))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// 过期限流记录的清理周期
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
    /// 每个 IP 每分钟允许的新 WebSocket 连接数
    #[validate(range(min = 1))]
    pub ws_connections_per_minute: u32,
}

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            ws_connections_per_minute: 10,
        }
    }
}

/// 静态用户状态表，供内存版用户目录使用
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStatusConfig {
    #[serde(default)]
    pub banned: Vec<u64>,
    #[serde(default)]
    pub inactive: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for AppConfig {
    /// 默认配置仅适用于开发环境，JWT 密钥必须在部署时覆盖
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                trusted_proxies: Vec::new(),
                internal_api_key: None,
            },
            websocket: WebSocketConfig::default(),
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
                expiration_hours: 24,
            },
            rate_limit: RateLimitConfig::default(),
            users: UserStatusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按 默认值 -> 配置文件 -> 环境变量 的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.check()?;
        Ok(config)
    }

    /// 从 TOML / YAML / JSON 字符串解析，格式按简单规则自动识别
    pub fn from_str(source: &str) -> Result<Self, ConfigError> {
        let trimmed = source.trim_start();
        let config: AppConfig = if trimmed.starts_with('{') {
            serde_json::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?
        } else if trimmed.starts_with('[') || source.contains(" = ") {
            toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?
        } else {
            serde_yaml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?
        };
        config.check()?;
        Ok(config)
    }

    /// 字段级校验之外的语义校验
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.websocket.ping_period() >= self.websocket.pong_wait() {
            return Err(ConfigError::InvalidWebSocketConfig(
                "ping period must be shorter than pong wait".to_string(),
            ));
        }

        if self
            .users
            .banned
            .iter()
            .any(|id| self.users.inactive.contains(id))
        {
            return Err(ConfigError::InvalidUserStatus(
                "a user cannot be both banned and inactive".to_string(),
            ));
        }

        Ok(())
    }

    /// 是否仍在使用开发默认密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt.secret.contains("dev-secret") || self.jwt.secret.contains("not-for-production")
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret = "[REDACTED]".to_string();
        if redacted.server.internal_api_key.is_some() {
            redacted.server.internal_api_key = Some("[REDACTED]".to_string());
        }
        format!("{:?}", redacted)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Invalid websocket configuration: {0}")]
    InvalidWebSocketConfig(String),
    #[error("Invalid user status configuration: {0}")]
    InvalidUserStatus(String),
}
