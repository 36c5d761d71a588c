//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动 Axum Web API 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    memory::{
        MemoryAvailabilityRepository, MemoryChatRestrictionRepository,
        MemoryChatWindowRepository, MemoryPresenceRepository, MemorySeed, MemoryUserRepository,
    },
    AvailabilityRepository, ChatRelay, ChatRestrictionRepository, ChatWindowRepository,
    ChatWindowService, ChatWindowServiceDependencies, Clock, ConnectionRegistry,
    PresenceRepository, ProximityManager, ProximityManagerDependencies, RelaySettings,
    SystemClock, UserRepository,
};
use chrono::FixedOffset;
use config::{AppConfig, LoggingConfig, StorageBackend};
use domain::SlotTimeZone;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

struct Repositories {
    presence: Arc<dyn PresenceRepository>,
    availability: Arc<dyn AvailabilityRepository>,
    users: Arc<dyn UserRepository>,
    chat_windows: Arc<dyn ChatWindowRepository>,
    restrictions: Arc<dyn ChatRestrictionRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;
    init_tracing(&config.logging);

    let repositories = build_repositories(&config).await?;
    let slot_zone = slot_zone(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let proximity_manager = Arc::new(ProximityManager::new(ProximityManagerDependencies {
        presence_repository: repositories.presence,
        availability_repository: repositories.availability,
        user_repository: repositories.users,
        clock: clock.clone(),
        slot_zone,
    }));
    let chat_window_service = Arc::new(ChatWindowService::new(ChatWindowServiceDependencies {
        chat_window_repository: repositories.chat_windows.clone(),
        restriction_repository: repositories.restrictions,
        clock,
    }));
    let relay = Arc::new(ChatRelay::new(
        Arc::new(ConnectionRegistry::new()),
        repositories.chat_windows,
        RelaySettings::from(&config.relay),
    ));

    let state = AppState::new(proximity_manager, chat_window_service, relay);
    let app = router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {address}"))?;

    tracing::info!(address = %address, "服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!(database = %config.sanitized_database_url(), "连接数据库");
            let infrastructure = Infrastructure::connect(&config.database)
                .await
                .context("初始化数据库失败")?;
            let storage = infrastructure.storage;
            Ok(Repositories {
                presence: storage.presence_repository.clone(),
                availability: storage.availability_repository.clone(),
                users: storage.user_repository.clone(),
                chat_windows: storage.chat_window_repository.clone(),
                restrictions: storage.restriction_repository.clone(),
            })
        }
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，进程退出后数据丢失");
            let users = Arc::new(MemoryUserRepository::new());
            let availability = Arc::new(MemoryAvailabilityRepository::new());
            match config.storage.seed_file.as_deref() {
                Some(path) => {
                    let seed = load_memory_seed(path).await?;
                    tracing::info!(
                        path,
                        users = seed.users.len(),
                        availability = seed.availability.len(),
                        "已载入内存初始数据"
                    );
                    seed.apply(&users, &availability).await;
                }
                None => tracing::warn!(
                    "未配置 storage.seed_file，内存模式下没有用户与可用时段，在线位置激活将返回 404"
                ),
            }
            Ok(Repositories {
                presence: Arc::new(MemoryPresenceRepository::new()),
                availability,
                users,
                chat_windows: Arc::new(MemoryChatWindowRepository::new()),
                restrictions: Arc::new(MemoryChatRestrictionRepository::new()),
            })
        }
    }
}

async fn load_memory_seed(path: &str) -> anyhow::Result<MemorySeed> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取初始数据文件 {path}"))?;
    MemorySeed::from_json(&raw).with_context(|| format!("初始数据文件格式错误 {path}"))
}

/// 可用时段字符串所在时区，未配置时按服务器本地时区逐日期解析
fn slot_zone(config: &AppConfig) -> anyhow::Result<SlotTimeZone> {
    match config.presence.slot_utc_offset_minutes {
        Some(minutes) => FixedOffset::east_opt(minutes * 60)
            .map(SlotTimeZone::Fixed)
            .with_context(|| format!("无效的时区偏移: {minutes} 分钟")),
        None => Ok(SlotTimeZone::Local),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
