//! 内存实现的存储（用于测试和本地开发）

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    AvailabilityId, AvailabilitySlot, ChatRestriction, ChatWindow, ChatWindowId, Coordinates,
    PresenceRecord, RadiusMeters, RepositoryError, Timestamp, UserId,
};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::repository::{
    AvailabilityRepository, ChatRestrictionRepository, ChatWindowRepository,
    CreatePresenceOutcome, PresenceRepository, UserRepository,
};

/// 内存在线位置存储。
///
/// 所有操作共用一把锁，检查加插入在锁内完成，因此不存在重复记录的竞争窗口。
#[derive(Default)]
pub struct MemoryPresenceRepository {
    records: Mutex<Vec<PresenceRecord>>,
}

impl MemoryPresenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含已过期记录在内的全部记录
    pub async fn all_records(&self) -> Vec<PresenceRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl PresenceRepository for MemoryPresenceRepository {
    async fn create_if_none_active(
        &self,
        record: PresenceRecord,
        now: Timestamp,
    ) -> Result<CreatePresenceOutcome, RepositoryError> {
        let mut records = self.records.lock().await;
        let has_active = records
            .iter()
            .any(|existing| existing.user_id == record.user_id && existing.is_active_at(now));
        if has_active {
            return Ok(CreatePresenceOutcome::ActiveExists);
        }
        records.push(record.clone());
        Ok(CreatePresenceOutcome::Created(record))
    }

    async fn expire_active(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut records = self.records.lock().await;
        let mut matched = 0;
        for record in records
            .iter_mut()
            .filter(|record| record.user_id == user_id && record.is_active_at(now))
        {
            record.expire(now);
            matched += 1;
        }
        Ok(matched)
    }

    async fn update_active_location(
        &self,
        user_id: UserId,
        coordinates: Coordinates,
        radius: Option<RadiusMeters>,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError> {
        let mut records = self.records.lock().await;
        let updated = records
            .iter_mut()
            .find(|record| record.user_id == user_id && record.is_active_at(now))
            .map(|record| {
                record.relocate(coordinates, radius);
                record.clone()
            });
        Ok(updated)
    }

    async fn find_active_for_user(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|record| record.user_id == user_id && record.is_active_at(now))
            .cloned())
    }

    async fn list_active(&self, now: Timestamp) -> Result<Vec<PresenceRecord>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|record| record.is_active_at(now))
            .cloned()
            .collect())
    }

    async fn list_active_except(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Vec<PresenceRecord>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|record| record.user_id != user_id && record.is_active_at(now))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryAvailabilityRepository {
    slots: RwLock<HashMap<AvailabilityId, AvailabilitySlot>>,
}

impl MemoryAvailabilityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, slot: AvailabilitySlot) {
        self.slots.write().await.insert(slot.id, slot);
    }
}

#[async_trait]
impl AvailabilityRepository for MemoryAvailabilityRepository {
    async fn find_owned(
        &self,
        id: AvailabilityId,
        user_id: UserId,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        let slots = self.slots.read().await;
        Ok(slots
            .get(&id)
            .filter(|slot| slot.is_owned_by(user_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashSet<UserId>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: UserId) {
        self.users.write().await.insert(user_id);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        Ok(self.users.read().await.contains(&id))
    }
}

/// 内存聊天窗口存储，保持插入顺序
#[derive(Default)]
pub struct MemoryChatWindowRepository {
    windows: RwLock<Vec<ChatWindow>>,
}

impl MemoryChatWindowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换窗口参与者，模拟外部的移除或屏蔽操作
    pub async fn replace_participants(&self, id: ChatWindowId, participant_ids: Vec<UserId>) {
        let mut windows = self.windows.write().await;
        if let Some(window) = windows.iter_mut().find(|window| window.id == id) {
            window.participant_ids = participant_ids;
        }
    }
}

#[async_trait]
impl ChatWindowRepository for MemoryChatWindowRepository {
    async fn create(&self, window: ChatWindow) -> Result<ChatWindow, RepositoryError> {
        self.windows.write().await.push(window.clone());
        Ok(window)
    }

    async fn find_by_id(&self, id: ChatWindowId) -> Result<Option<ChatWindow>, RepositoryError> {
        let windows = self.windows.read().await;
        Ok(windows.iter().find(|window| window.id == id).cloned())
    }

    async fn list_by_participant(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChatWindow>, RepositoryError> {
        let windows = self.windows.read().await;
        Ok(windows
            .iter()
            .filter(|window| window.has_participant(user_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryChatRestrictionRepository {
    restrictions: RwLock<Vec<ChatRestriction>>,
}

impl MemoryChatRestrictionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ChatRestriction> {
        self.restrictions.read().await.clone()
    }
}

#[async_trait]
impl ChatRestrictionRepository for MemoryChatRestrictionRepository {
    async fn create(
        &self,
        restriction: ChatRestriction,
    ) -> Result<ChatRestriction, RepositoryError> {
        self.restrictions.write().await.push(restriction.clone());
        Ok(restriction)
    }
}

/// 内存后端的初始数据。
///
/// 用户与可用时段由外部排期功能维护，内存模式下没有写入入口，只能在启动时载入。
/// 时段所属用户会自动登记。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySeed {
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub availability: Vec<AvailabilitySlot>,
}

impl MemorySeed {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub async fn apply(
        self,
        users: &MemoryUserRepository,
        availability: &MemoryAvailabilityRepository,
    ) {
        for user_id in self.users {
            users.insert(user_id).await;
        }
        for slot in self.availability {
            users.insert(slot.user_id).await;
            availability.insert(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{FixedOffset, TimeZone, Utc};
    use domain::SlotTimeZone;

    use crate::clock::FixedClock;
    use crate::services::{
        ActivatePresenceRequest, ProximityManager, ProximityManagerDependencies,
    };

    #[tokio::test]
    async fn seeded_memory_backend_can_activate_presence() {
        let owner = UserId::generate();
        let listed_only = UserId::generate();
        let slot_id = AvailabilityId::generate();
        let raw = format!(
            r#"{{
                "users": ["{listed_only}"],
                "availability": [{{
                    "id": "{slot_id}",
                    "userId": "{owner}",
                    "date": "2025-03-10",
                    "startTime": "11:00",
                    "endTime": "14:00",
                    "isAvailable": true,
                    "location": "cafe"
                }}]
            }}"#
        );

        let users = Arc::new(MemoryUserRepository::new());
        let availability = Arc::new(MemoryAvailabilityRepository::new());
        MemorySeed::from_json(&raw)
            .unwrap()
            .apply(&users, &availability)
            .await;

        assert!(users.exists(owner).await.unwrap());
        assert!(users.exists(listed_only).await.unwrap());

        let manager = ProximityManager::new(ProximityManagerDependencies {
            presence_repository: Arc::new(MemoryPresenceRepository::new()),
            availability_repository: availability,
            user_repository: users,
            clock: Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
            )),
            slot_zone: SlotTimeZone::Fixed(FixedOffset::east_opt(0).unwrap()),
        });
        let record = manager
            .activate(ActivatePresenceRequest {
                user_id: owner,
                availability_id: Some(slot_id.to_string()),
                latitude: Some(48.85),
                longitude: Some(2.35),
                radius: Some(500.0),
            })
            .await
            .unwrap();
        assert_eq!(record.availability_id, slot_id);
    }

    #[test]
    fn empty_seed_is_accepted() {
        let seed = MemorySeed::from_json("{}").unwrap();
        assert!(seed.users.is_empty());
        assert!(seed.availability.is_empty());
        assert!(MemorySeed::from_json("[1, 2]").is_err());
    }
}
