//! 实时推送中心的领域模型
//!
//! 包含标识值对象、线上帧（Frame）信封、领域事件及其错误类型。

pub mod errors;
pub mod events;
pub mod frame;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use frame::*;
pub use value_objects::*;
