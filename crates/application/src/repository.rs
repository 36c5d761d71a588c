//! 应用层依赖的存储接口
//!
//! 在线位置记录由核心拥有；可用时段、用户、聊天窗口属于外部协作方，核心只按需读取。

use async_trait::async_trait;
use domain::{
    AvailabilityId, AvailabilitySlot, ChatRestriction, ChatWindow, ChatWindowId, Coordinates,
    PresenceRecord, RadiusMeters, RepositoryError, Timestamp, UserId,
};

/// 创建在线位置记录的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CreatePresenceOutcome {
    Created(PresenceRecord),
    /// 用户已有未过期的记录，未写入
    ActiveExists,
}

/// 在线位置记录存储。
///
/// “每个用户最多一条未过期记录”由 [`PresenceRepository::create_if_none_active`]
/// 的检查加插入保证，实现方应尽可能以事务或锁让两步原子化。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn create_if_none_active(
        &self,
        record: PresenceRecord,
        now: Timestamp,
    ) -> Result<CreatePresenceOutcome, RepositoryError>;

    /// 将用户所有未过期记录的过期时间设为 `now`，返回命中的记录数
    async fn expire_active(&self, user_id: UserId, now: Timestamp)
        -> Result<u64, RepositoryError>;

    /// 更新用户未过期记录的位置（半径可选），返回更新后的记录
    async fn update_active_location(
        &self,
        user_id: UserId,
        coordinates: Coordinates,
        radius: Option<RadiusMeters>,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError>;

    async fn find_active_for_user(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError>;

    async fn list_active(&self, now: Timestamp) -> Result<Vec<PresenceRecord>, RepositoryError>;

    /// 除指定用户以外的所有未过期记录
    async fn list_active_except(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Vec<PresenceRecord>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// 查找属于该用户的可用时段
    async fn find_owned(
        &self,
        id: AvailabilityId,
        user_id: UserId,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn exists(&self, id: UserId) -> Result<bool, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatWindowRepository: Send + Sync {
    async fn create(&self, window: ChatWindow) -> Result<ChatWindow, RepositoryError>;
    async fn find_by_id(&self, id: ChatWindowId) -> Result<Option<ChatWindow>, RepositoryError>;
    async fn list_by_participant(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChatWindow>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRestrictionRepository: Send + Sync {
    async fn create(&self, restriction: ChatRestriction)
        -> Result<ChatRestriction, RepositoryError>;
}
