//! 基础设施层实现。
//!
//! 提供消息存储、用户目录的内存版适配器，以及限流记录的后台清理任务。

pub mod builder;
pub mod cleanup;
pub mod directory;
pub mod repository;

pub use builder::Infrastructure;
pub use cleanup::spawn_rate_limit_cleanup;
pub use directory::InMemoryUserDirectory;
pub use repository::{InMemoryMessageStore, StoredMessage};
