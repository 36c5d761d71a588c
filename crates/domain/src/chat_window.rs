use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatWindowId, RestrictionId, Timestamp, UserId};

/// 聊天窗口：一对一或群组的参与者集合。
///
/// 转发时以它为“谁当前可以接收消息”的唯一依据，每条消息都重新读取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatWindow {
    pub id: ChatWindowId,
    pub participant_ids: Vec<UserId>,
    pub is_group: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChatWindow {
    /// 创建聊天窗口，至少需要两个不同的参与者；重复的ID只保留第一次出现。
    pub fn new(
        id: ChatWindowId,
        participant_ids: Vec<UserId>,
        is_group: bool,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let mut seen = HashSet::with_capacity(participant_ids.len());
        let participant_ids: Vec<UserId> = participant_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        if participant_ids.len() < 2 {
            return Err(DomainError::validation_error(
                "participantIds",
                "at least 2 participants required",
            ));
        }

        Ok(Self {
            id,
            participant_ids,
            is_group,
            created_at,
            updated_at: created_at,
        })
    }

    /// 当前有效参与者集合
    pub fn participant_set(&self) -> HashSet<UserId> {
        self.participant_ids.iter().copied().collect()
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// 聊天限制（屏蔽）记录。
///
/// 只做记录，转发层不会据此过滤消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRestriction {
    pub id: RestrictionId,
    pub chat_window_id: ChatWindowId,
    pub restriction_type: String,
    pub restricted_by: UserId,
    pub created_at: Timestamp,
}

impl ChatRestriction {
    pub fn new(
        id: RestrictionId,
        chat_window_id: ChatWindowId,
        restriction_type: impl Into<String>,
        restricted_by: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let restriction_type = restriction_type.into().trim().to_owned();
        if restriction_type.is_empty() {
            return Err(DomainError::validation_error(
                "restrictionType",
                "cannot be empty",
            ));
        }
        if restriction_type.len() > 64 {
            return Err(DomainError::validation_error("restrictionType", "too long"));
        }
        Ok(Self {
            id,
            chat_window_id,
            restriction_type,
            restricted_by,
            created_at,
        })
    }
}
