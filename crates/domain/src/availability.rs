use serde::{Deserialize, Serialize};

use crate::value_objects::{AvailabilityId, UserId};

/// 用户声明的可用时段，由外部排期功能维护，核心只读。
///
/// `date` 形如 `YYYY-MM-DD`，`start_time` / `end_time` 形如 `HH:MM` 或
/// `HH:MM:SS`；开放式的“现在可用”时段 `end_time` 为空字符串。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlot {
    pub id: AvailabilityId,
    pub user_id: UserId,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
    pub location: String,
}

impl AvailabilitySlot {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
