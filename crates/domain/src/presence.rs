//! 在线位置记录
//!
//! 一条记录表示某个用户在一段时间内公开自己的位置，并在给定半径内可被发现。

use chrono::{Duration, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::AvailabilitySlot;
use crate::value_objects::{
    AvailabilityId, Coordinates, PresenceId, RadiusMeters, Timestamp, UserId,
};

/// 可用时段日期时间的两种格式
pub const SLOT_TIME_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];

/// 无法解析结束时间时的默认时长
pub const DEFAULT_PRESENCE_DURATION_SECS: i64 = 60 * 60;

/// 在线位置的有效时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceWindow {
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl PresenceWindow {
    /// 根据可用时段推导时间窗口（尽力解析）：
    /// 开始时间解析失败时使用 `now`，结束时间解析失败时使用开始时间加一小时。
    pub fn from_slot<Tz: TimeZone>(slot: &AvailabilitySlot, tz: &Tz, now: Timestamp) -> Self {
        let created_at = parse_slot_time(&slot.date, &slot.start_time, tz).unwrap_or(now);
        let expires_at = parse_slot_time(&slot.date, &slot.end_time, tz)
            .unwrap_or_else(|| created_at + Duration::seconds(DEFAULT_PRESENCE_DURATION_SECS));

        Self {
            created_at,
            expires_at,
        }
    }
}

/// 可用时段字符串所在的时区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTimeZone {
    /// 服务器本地时区，夏令时偏移按时段自己的日期确定
    Local,
    Fixed(FixedOffset),
}

impl SlotTimeZone {
    pub fn window_for(&self, slot: &AvailabilitySlot, now: Timestamp) -> PresenceWindow {
        match self {
            SlotTimeZone::Local => PresenceWindow::from_slot(slot, &Local, now),
            SlotTimeZone::Fixed(offset) => PresenceWindow::from_slot(slot, offset, now),
        }
    }
}

/// 按 [`SLOT_TIME_LAYOUTS`] 依次尝试解析 `date time`，结果换算为 UTC。
pub fn parse_slot_time<Tz: TimeZone>(date: &str, time: &str, tz: &Tz) -> Option<Timestamp> {
    let raw = format!("{} {}", date.trim(), time.trim());
    SLOT_TIME_LAYOUTS.iter().find_map(|layout| {
        let naive = NaiveDateTime::parse_from_str(&raw, layout).ok()?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

/// 持久化的在线位置记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: PresenceId,
    pub user_id: UserId,
    pub availability_id: AvailabilityId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "radius")]
    pub radius_meters: f64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl PresenceRecord {
    pub fn new(
        id: PresenceId,
        user_id: UserId,
        availability_id: AvailabilityId,
        coordinates: Coordinates,
        radius: RadiusMeters,
        window: PresenceWindow,
    ) -> Self {
        Self {
            id,
            user_id,
            availability_id,
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            radius_meters: radius.value(),
            created_at: window.created_at,
            expires_at: window.expires_at,
        }
    }

    /// 记录在 `now` 时刻是否仍然有效
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// 更新位置，半径仅在提供时更新；过期时间保持不变。
    pub fn relocate(&mut self, coordinates: Coordinates, radius: Option<RadiusMeters>) {
        self.latitude = coordinates.latitude;
        self.longitude = coordinates.longitude;
        if let Some(radius) = radius {
            self.radius_meters = radius.value();
        }
    }

    /// 立即过期
    pub fn expire(&mut self, now: Timestamp) {
        self.expires_at = now;
    }

    /// 以本记录的半径判断 `other` 是否在附近（非对称：只看请求方半径）。
    pub fn nearby_match(&self, other: &PresenceRecord) -> Option<NearbyMatch> {
        let distance = self.coordinates().distance_to(&other.coordinates());
        (distance <= self.radius_meters).then(|| NearbyMatch {
            user_id: other.user_id,
            latitude: other.latitude,
            longitude: other.longitude,
            radius_meters: other.radius_meters,
            distance_meters: distance,
            expires_at: other.expires_at,
        })
    }
}

/// 附近用户查询结果项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyMatch {
    pub user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "radius")]
    pub radius_meters: f64,
    pub distance_meters: f64,
    pub expires_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(date: &str, start: &str, end: &str) -> AvailabilitySlot {
        AvailabilitySlot {
            id: AvailabilityId::generate(),
            user_id: UserId::generate(),
            date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            is_available: true,
            location: String::new(),
        }
    }

    fn utc(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn window_is_parsed_from_both_layouts() {
        let now = utc("2026-10-15T08:00:00Z");
        let window = PresenceWindow::from_slot(
            &slot("2026-10-15", "09:30", "11:45:30"),
            &Utc,
            now,
        );
        assert_eq!(window.created_at, utc("2026-10-15T09:30:00Z"));
        assert_eq!(window.expires_at, utc("2026-10-15T11:45:30Z"));
    }

    #[test]
    fn window_honours_slot_timezone() {
        let now = utc("2026-10-15T00:00:00Z");
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        let window =
            PresenceWindow::from_slot(&slot("2026-10-15", "10:00", "12:00"), &shanghai, now);
        assert_eq!(window.created_at, utc("2026-10-15T02:00:00Z"));
        assert_eq!(window.expires_at, utc("2026-10-15T04:00:00Z"));
    }

    #[test]
    fn local_zone_resolves_offset_per_slot_date() {
        let now = utc("2026-10-15T00:00:00Z");
        for date in ["2026-01-15", "2026-07-15", "2026-12-15"] {
            let window = SlotTimeZone::Local.window_for(&slot(date, "10:00", "12:00"), now);

            let naive =
                NaiveDateTime::parse_from_str(&format!("{date} 10:00"), "%Y-%m-%d %H:%M").unwrap();
            // 每个日期各自的本地偏移，而不是进程启动时的偏移
            let offset = Local.offset_from_local_datetime(&naive).earliest().unwrap();
            let shifted = naive - Duration::seconds(i64::from(offset.local_minus_utc()));
            let expected = Utc.from_utc_datetime(&shifted);
            assert_eq!(window.created_at, expected, "slot date {date}");
            assert_eq!(window.expires_at, expected + Duration::hours(2));
        }
    }

    #[test]
    fn fixed_zone_applies_configured_offset() {
        let now = utc("2026-10-15T00:00:00Z");
        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        let window = SlotTimeZone::Fixed(minus_five)
            .window_for(&slot("2026-12-15", "10:00", "11:00"), now);
        assert_eq!(window.created_at, utc("2026-12-15T15:00:00Z"));
        assert_eq!(window.expires_at, utc("2026-12-15T16:00:00Z"));
    }

    #[test]
    fn unparseable_start_falls_back_to_now() {
        let now = utc("2026-10-15T08:00:00Z");
        let window = PresenceWindow::from_slot(&slot("garbage", "xx", ""), &Utc, now);
        assert_eq!(window.created_at, now);
        assert_eq!(window.expires_at, now + Duration::hours(1));
    }

    #[test]
    fn open_ended_slot_lasts_one_hour_from_start() {
        let now = utc("2026-10-15T08:00:00Z");
        let window = PresenceWindow::from_slot(&slot("2026-10-15", "14:00", ""), &Utc, now);
        assert_eq!(window.created_at, utc("2026-10-15T14:00:00Z"));
        assert_eq!(window.expires_at, utc("2026-10-15T15:00:00Z"));
    }

    #[test]
    fn nearby_match_uses_requester_radius_only() {
        let now = utc("2026-10-15T08:00:00Z");
        let window = PresenceWindow {
            created_at: now,
            expires_at: now + Duration::hours(1),
        };
        let near_lon = crate::geo::equator_longitude_offset(500.0);

        let me = PresenceRecord::new(
            PresenceId::generate(),
            UserId::generate(),
            AvailabilityId::generate(),
            Coordinates::new(0.0, 0.0).unwrap(),
            RadiusMeters::new(1000.0).unwrap(),
            window,
        );
        let other = PresenceRecord::new(
            PresenceId::generate(),
            UserId::generate(),
            AvailabilityId::generate(),
            Coordinates::new(0.0, near_lon).unwrap(),
            RadiusMeters::new(0.0).unwrap(),
            window,
        );

        let found = me.nearby_match(&other).expect("other is within my radius");
        assert!((found.distance_meters - 500.0).abs() < 1.0);
        assert_eq!(found.user_id, other.user_id);
        // 对方半径为 0，反向查询看不到我
        assert!(other.nearby_match(&me).is_none());
    }

    #[test]
    fn record_serializes_with_external_field_names() {
        let now = utc("2026-10-15T08:00:00Z");
        let record = PresenceRecord::new(
            PresenceId::generate(),
            UserId::generate(),
            AvailabilityId::generate(),
            Coordinates::new(1.0, 2.0).unwrap(),
            RadiusMeters::new(30.0).unwrap(),
            PresenceWindow {
                created_at: now,
                expires_at: now,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["radius"], 30.0);
        assert!(json.get("userId").is_some());
        assert!(json.get("availabilityId").is_some());
        assert!(json.get("expiresAt").is_some());
    }
}
