//! 应用层实现。
//!
//! 这里提供在线位置与聊天窗口的用例服务、实时连接注册表与消息转发，
//! 以及对存储适配器的抽象和内存实现。

pub mod clock;
pub mod connection_registry;
pub mod error;
pub mod memory;
pub mod relay;
pub mod repository;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use connection_registry::{ConnectionRegistry, LiveConnection};
pub use error::ApplicationError;
pub use relay::{ChatRelay, DropReason, RelayError, RelayOutcome, RelaySession, RelaySettings};
pub use repository::{
    AvailabilityRepository, ChatRestrictionRepository, ChatWindowRepository,
    CreatePresenceOutcome, PresenceRepository, UserRepository,
};
pub use services::{
    ActivatePresenceRequest, BlockChatRequest, ChatWindowService, ChatWindowServiceDependencies,
    CreateChatWindowRequest, ProximityManager, ProximityManagerDependencies,
    UpdateLocationRequest,
};
