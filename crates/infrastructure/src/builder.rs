use std::sync::Arc;

use application::{MessageStore, UserDirectory};
use config::AppConfig;

use crate::{directory::InMemoryUserDirectory, repository::InMemoryMessageStore};

/// 推送中心依赖的外部协作者集合
#[derive(Clone)]
pub struct Infrastructure {
    pub message_store: Arc<InMemoryMessageStore>,
    pub user_directory: Arc<InMemoryUserDirectory>,
}

impl Infrastructure {
    pub fn in_memory(config: &AppConfig) -> Self {
        Self {
            message_store: Arc::new(InMemoryMessageStore::new()),
            user_directory: Arc::new(InMemoryUserDirectory::from_config(&config.users)),
        }
    }

    pub fn message_store_trait(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    pub fn user_directory_trait(&self) -> Arc<dyn UserDirectory> {
        self.user_directory.clone()
    }
}
