use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 为 UUID 包装类型生成构造、解析与格式化实现。
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// 解析外部传入的字符串ID，空值与格式错误均视为验证错误。
            pub fn parse(value: &str) -> Result<Self, DomainError> {
                let value = value.trim();
                if value.is_empty() {
                    return Err(DomainError::validation_error($field, "is required"));
                }
                Uuid::parse_str(value)
                    .map(Self)
                    .map_err(|_| DomainError::validation_error($field, "malformed id"))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识。
    UserId,
    "userId"
);
uuid_id!(
    /// 聊天窗口唯一标识。
    ChatWindowId,
    "chatWindowId"
);
uuid_id!(
    /// 在线位置记录唯一标识。
    PresenceId,
    "id"
);
uuid_id!(
    /// 可用时段唯一标识。
    AvailabilityId,
    "availabilityId"
);
uuid_id!(
    /// 聊天限制记录唯一标识。
    RestrictionId,
    "id"
);
uuid_id!(
    /// 实时连接唯一标识，仅存在于内存中。
    ConnectionId,
    "connectionId"
);

/// 经过验证的地理坐标。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::validation_error(
                "latitude",
                "must be within [-90, 90]",
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::validation_error(
                "longitude",
                "must be within [-180, 180]",
            ));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// 从可选字段构造，缺失字段视为验证错误。
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Result<Self, DomainError> {
        let latitude =
            latitude.ok_or_else(|| DomainError::validation_error("latitude", "is required"))?;
        let longitude =
            longitude.ok_or_else(|| DomainError::validation_error("longitude", "is required"))?;
        Self::new(latitude, longitude)
    }

    /// 到另一坐标的大圆距离（米）。
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        crate::geo::distance_meters(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// 可见半径（米），非负。
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadiusMeters(f64);

impl RadiusMeters {
    pub fn new(value: f64) -> Result<Self, DomainError> {
        if !value.is_finite() || value < 0.0 {
            return Err(DomainError::validation_error(
                "radius",
                "must be a non-negative number of meters",
            ));
        }
        Ok(Self(value))
    }

    /// 未提供半径时默认为 0。
    pub fn from_optional(value: Option<f64>) -> Result<Self, DomainError> {
        value.map(Self::new).transpose().map(Option::unwrap_or_default)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}
