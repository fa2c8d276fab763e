use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use domain::{DomainEvent, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, InternalCaller},
    error::ApiError,
    rate_limit::api_rate_limit,
    state::AppState,
    websocket::websocket_upgrade,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub rooms: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub users: Vec<UserId>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserOnlineResponse {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomMembersResponse {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct PublishEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    aggregate_id: String,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventAccepted {
    pub id: Uuid,
    pub handlers: usize,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/online-users", get(online_users))
        .route("/users/{user_id}/online", get(user_online))
        .route("/rooms/{room_id}/members", get(room_members))
        .route("/events", post(publish_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_rate_limit))
        .layer(CompressionLayer::new());

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.websocket.allowed_origins)),
        )
        .with_state(state)
}

/// 与 WebSocket 共用同一份来源白名单
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_shut_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        sessions: state.hub.session_count().await,
        rooms: state.hub.room_count().await,
    })
}

async fn online_users(
    State(state): State<AppState>,
    _caller: AuthUser,
) -> Json<OnlineUsersResponse> {
    let users = state.hub.online_users().await;
    Json(OnlineUsersResponse {
        count: users.len(),
        users,
    })
}

async fn user_online(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(user_id): Path<u64>,
) -> Json<UserOnlineResponse> {
    let user_id = UserId(user_id);
    Json(UserOnlineResponse {
        user_id,
        is_online: state.hub.is_online(user_id).await,
    })
}

async fn room_members(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(room_id): Path<u64>,
) -> Json<RoomMembersResponse> {
    let room_id = RoomId(room_id);
    Json(RoomMembersResponse {
        room_id,
        members: state.hub.room_members(room_id).await,
    })
}

/// 仅供内部服务调用，用户 token 无权投递事件
async fn publish_event(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Json(payload): Json<PublishEventPayload>,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    let event = DomainEvent::new(payload.event_type, payload.aggregate_id, payload.body)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let id = event.id;
    let event_type = event.event_type.clone();

    let handlers = state.event_bus.publish(event);
    info!(event_id = %id, event_type = %event_type, handlers, "外部事件已发布");

    Ok((StatusCode::ACCEPTED, Json(EventAccepted { id, handlers })))
}
