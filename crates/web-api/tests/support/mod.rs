#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{
        MemoryAvailabilityRepository, MemoryChatRestrictionRepository,
        MemoryChatWindowRepository, MemoryPresenceRepository, MemoryUserRepository,
    },
    ChatRelay, ChatWindowService, ChatWindowServiceDependencies, ConnectionRegistry,
    ProximityManager, ProximityManagerDependencies, RelaySettings, SystemClock,
};
use chrono::FixedOffset;
use config::AppConfig;
use domain::{AvailabilityId, AvailabilitySlot, ChatWindowId, SlotTimeZone, UserId};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState};

/// 基于内存存储启动的完整 HTTP 服务
pub struct TestApp {
    pub addr: SocketAddr,
    pub users: Arc<MemoryUserRepository>,
    pub availability: Arc<MemoryAvailabilityRepository>,
    pub chat_windows: Arc<MemoryChatWindowRepository>,
    pub restrictions: Arc<MemoryChatRestrictionRepository>,
    pub relay: Arc<ChatRelay>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, user_id: impl std::fmt::Display, chat_window_id: impl std::fmt::Display) -> String {
        format!(
            "ws://{}/api/v1/chat/ws/{}?chatWindowId={}",
            self.addr, user_id, chat_window_id
        )
    }

    pub async fn seed_user(&self) -> UserId {
        let id = UserId::generate();
        self.users.insert(id).await;
        id
    }

    /// 日期与时间无法解析的时段：有效期从现在起一小时
    pub async fn seed_open_slot(&self, user_id: UserId) -> AvailabilityId {
        self.seed_slot(user_id, "", "", "", true).await
    }

    pub async fn seed_slot(
        &self,
        user_id: UserId,
        date: &str,
        start_time: &str,
        end_time: &str,
        is_available: bool,
    ) -> AvailabilityId {
        let slot = AvailabilitySlot {
            id: AvailabilityId::generate(),
            user_id,
            date: date.to_string(),
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            is_available,
            location: "library".to_string(),
        };
        let id = slot.id;
        self.availability.insert(slot).await;
        id
    }

    /// 等待窗口内的连接数达到预期
    pub async fn wait_for_connections(&self, chat_window_id: ChatWindowId, expected: usize) {
        for _ in 0..200 {
            if self.relay.registry().connection_count(chat_window_id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chat window {chat_window_id} never reached {expected} connections");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn spawn_app() -> TestApp {
    let users = Arc::new(MemoryUserRepository::new());
    let availability = Arc::new(MemoryAvailabilityRepository::new());
    let presence = Arc::new(MemoryPresenceRepository::new());
    let chat_windows = Arc::new(MemoryChatWindowRepository::new());
    let restrictions = Arc::new(MemoryChatRestrictionRepository::new());
    let clock = Arc::new(SystemClock);

    let proximity_manager = Arc::new(ProximityManager::new(ProximityManagerDependencies {
        presence_repository: presence,
        availability_repository: availability.clone(),
        user_repository: users.clone(),
        clock: clock.clone(),
        slot_zone: SlotTimeZone::Fixed(FixedOffset::east_opt(0).expect("utc offset")),
    }));
    let chat_window_service = Arc::new(ChatWindowService::new(ChatWindowServiceDependencies {
        chat_window_repository: chat_windows.clone(),
        restriction_repository: restrictions.clone(),
        clock,
    }));

    let mut settings = RelaySettings::from(&AppConfig::default().relay);
    settings.send_timeout = Duration::from_millis(500);
    let relay = Arc::new(ChatRelay::new(
        Arc::new(ConnectionRegistry::new()),
        chat_windows.clone(),
        settings,
    ));

    let state = AppState::new(proximity_manager, chat_window_service, relay.clone());
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestApp {
        addr,
        users,
        availability,
        chat_windows,
        restrictions,
        relay,
        shutdown: Some(shutdown_tx),
    }
}
