use std::sync::Arc;

use application::{ChatRelay, ChatWindowService, ProximityManager};

#[derive(Clone)]
pub struct AppState {
    pub proximity_manager: Arc<ProximityManager>,
    pub chat_window_service: Arc<ChatWindowService>,
    /// 连接注册表由转发器持有，整个进程共享一份
    pub relay: Arc<ChatRelay>,
}

impl AppState {
    pub fn new(
        proximity_manager: Arc<ProximityManager>,
        chat_window_service: Arc<ChatWindowService>,
        relay: Arc<ChatRelay>,
    ) -> Self {
        Self {
            proximity_manager,
            chat_window_service,
            relay,
        }
    }
}
