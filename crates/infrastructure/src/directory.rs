use std::collections::HashMap;

use application::{ApplicationError, UserDirectory, UserStatus};
use async_trait::async_trait;
use config::UserStatusConfig;
use domain::UserId;
use tokio::sync::RwLock;

/// 内存中的用户状态表，未登记的用户视为正常
#[derive(Default)]
pub struct InMemoryUserDirectory {
    statuses: RwLock<HashMap<UserId, UserStatus>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置中的封禁、停用名单构建
    pub fn from_config(config: &UserStatusConfig) -> Self {
        let statuses = config
            .banned
            .iter()
            .map(|id| (UserId(*id), UserStatus::Banned))
            .chain(
                config
                    .inactive
                    .iter()
                    .map(|id| (UserId(*id), UserStatus::Inactive)),
            )
            .collect();

        Self {
            statuses: RwLock::new(statuses),
        }
    }

    pub async fn set_status(&self, user_id: UserId, status: UserStatus) {
        let mut statuses = self.statuses.write().await;
        if status == UserStatus::Active {
            statuses.remove(&user_id);
        } else {
            statuses.insert(user_id, status);
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn status(&self, user_id: UserId) -> Result<UserStatus, ApplicationError> {
        Ok(self
            .statuses
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(UserStatus::Active))
    }
}
