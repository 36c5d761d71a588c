mod chat_window_service;
mod proximity_manager;

pub use chat_window_service::{
    BlockChatRequest, ChatWindowService, ChatWindowServiceDependencies, CreateChatWindowRequest,
};
pub use proximity_manager::{
    ActivatePresenceRequest, ProximityManager, ProximityManagerDependencies,
    UpdateLocationRequest,
};
