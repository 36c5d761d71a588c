//! 基础设施层实现。
//!
//! 提供 Postgres 存储适配器与数据库迁移，实现应用层定义的存储接口。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgAvailabilityRepository, PgChatRestrictionRepository,
    PgChatWindowRepository, PgPresenceRepository, PgStorage, PgUserRepository,
};
