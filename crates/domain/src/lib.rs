//! 在线位置与聊天转发的核心领域模型
//!
//! 包含在线位置记录、可用时段、聊天窗口等实体，以及距离计算等纯函数。

pub mod availability;
pub mod chat_window;
pub mod errors;
pub mod geo;
pub mod presence;
pub mod relay;
pub mod value_objects;

// 重新导出常用类型
pub use availability::*;
pub use chat_window::*;
pub use errors::*;
pub use presence::*;
pub use relay::*;
pub use value_objects::*;
