use std::net::IpAddr;
use std::sync::Arc;

use application::{
    ChatDispatcher, Clock, EventBus, Hub, HubEventHandler, RateLimitPresets, UserDirectory,
};
use config::{AppConfig, WebSocketConfig};
use infrastructure::Infrastructure;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<ChatDispatcher>,
    pub rate_limits: RateLimitPresets,
    pub jwt_service: Arc<JwtService>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub websocket: Arc<WebSocketConfig>,
    pub trusted_proxies: Arc<[IpAddr]>,
    /// 未配置时内部接口全部拒绝
    pub internal_api_key: Option<Arc<str>>,
}

impl AppState {
    /// 按配置装配推送中心、事件总线与分发器
    ///
    /// 总线上的推送处理器在这里完成订阅。
    pub fn build(
        config: &AppConfig,
        infrastructure: &Infrastructure,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let hub = Hub::new(config.websocket.send_queue_capacity, clock.clone())?;
        let event_bus = Arc::new(EventBus::new());
        let handler_ids =
            Arc::new(HubEventHandler::new(hub.clone(), clock.clone())).subscribe_to(&event_bus);
        tracing::debug!(handlers = handler_ids.len(), "推送处理器已订阅事件总线");

        let rate_limits = RateLimitPresets::new(&config.rate_limit, clock.clone())?;
        let dispatcher = Arc::new(ChatDispatcher::new(
            hub.clone(),
            infrastructure.message_store_trait(),
            event_bus.clone(),
            rate_limits.chat_message.clone(),
            clock,
        ));

        Ok(Self {
            hub,
            event_bus,
            dispatcher,
            rate_limits,
            jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
            user_directory: infrastructure.user_directory_trait(),
            websocket: Arc::new(config.websocket.clone()),
            trusted_proxies: config.server.trusted_proxies.as_slice().into(),
            internal_api_key: config.server.internal_api_key.as_deref().map(Arc::from),
        })
    }
}
