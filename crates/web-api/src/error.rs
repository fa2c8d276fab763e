use application::{ApplicationError, HubError, RATE_LIMIT_EXCEEDED};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub const CORS_NOT_ALLOWED: &str = "CORS_NOT_ALLOWED";
pub const BAD_UPGRADE: &str = "BAD_UPGRADE";
pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
pub const USER_BANNED: &str = "USER_BANNED";
pub const USER_INACTIVE: &str = "USER_INACTIVE";
pub const INTERNAL_ONLY: &str = "INTERNAL_ONLY";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    /// 仅限流拒绝时存在，单位秒
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
            retry_after: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn bad_upgrade(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, BAD_UPGRADE, message)
    }

    pub fn missing_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, MISSING_TOKEN, "authentication token is required")
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, INVALID_TOKEN, message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                RATE_LIMIT_EXCEEDED,
                "rate limit exceeded",
            )
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        match error {
            HubError::ShutDown => ApiError::service_unavailable("server is shutting down"),
            HubError::InvalidArgument { field, reason } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            HubError::Serialization(message) => ApiError::internal_server_error(message),
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(err) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", err.to_string())
            }
            AppErr::Hub(err) => err.into(),
            AppErr::RateLimit(application::RateLimitError::Exceeded { retry_after, .. }) => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                ApiError::rate_limited(secs.max(1))
            }
            AppErr::RateLimit(err) => ApiError::internal_server_error(err.to_string()),
            AppErr::Store(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                format!("store error: {}", message),
            ),
            AppErr::Directory(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DIRECTORY_ERROR",
                format!("user directory error: {}", message),
            ),
            AppErr::Handler(message) => ApiError::internal_server_error(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.retry_after {
            Some(retry_after) => {
                let body = json!({
                    "error": self.body.message,
                    "code": self.body.code,
                    "retry_after": retry_after,
                });
                let mut response = (self.status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            None => (self.status, Json(self.body)).into_response(),
        }
    }
}
