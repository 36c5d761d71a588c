use std::sync::Arc;

use domain::{
    AvailabilityId, Coordinates, DomainError, NearbyMatch, PresenceId, PresenceRecord,
    RadiusMeters, SlotTimeZone, UserId,
};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{
        AvailabilityRepository, CreatePresenceOutcome, PresenceRepository, UserRepository,
    },
};

#[derive(Debug, Clone)]
pub struct ActivatePresenceRequest {
    pub user_id: UserId,
    pub availability_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct UpdateLocationRequest {
    pub user_id: UserId,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

pub struct ProximityManagerDependencies {
    pub presence_repository: Arc<dyn PresenceRepository>,
    pub availability_repository: Arc<dyn AvailabilityRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
    /// 可用时段日期时间所在的时区
    pub slot_zone: SlotTimeZone,
}

/// 在线位置的激活、关闭、更新与附近查询。
pub struct ProximityManager {
    deps: ProximityManagerDependencies,
}

impl ProximityManager {
    pub fn new(deps: ProximityManagerDependencies) -> Self {
        Self { deps }
    }

    /// 基于用户自己的可用时段激活在线位置。
    pub async fn activate(
        &self,
        request: ActivatePresenceRequest,
    ) -> Result<PresenceRecord, ApplicationError> {
        let user_id = request.user_id;
        self.ensure_user_exists(user_id).await?;

        let coordinates = Coordinates::from_parts(request.latitude, request.longitude)?;
        let availability_id =
            AvailabilityId::parse(request.availability_id.as_deref().unwrap_or_default())?;
        let radius = RadiusMeters::from_optional(request.radius)?;

        let slot = self
            .deps
            .availability_repository
            .find_owned(availability_id, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("availability", availability_id))?;

        if !slot.is_available {
            return Err(DomainError::invalid_state("availability slot is not available").into());
        }

        let now = self.deps.clock.now();
        let window = self.deps.slot_zone.window_for(&slot, now);
        let record = PresenceRecord::new(
            PresenceId::generate(),
            user_id,
            availability_id,
            coordinates,
            radius,
            window,
        );

        match self
            .deps
            .presence_repository
            .create_if_none_active(record, now)
            .await?
        {
            CreatePresenceOutcome::Created(record) => {
                info!(
                    user_id = %user_id,
                    presence_id = %record.id,
                    expires_at = %record.expires_at,
                    "在线位置已激活"
                );
                Ok(record)
            }
            CreatePresenceOutcome::ActiveExists => Err(DomainError::conflict(
                "user already has an active proximity",
            )
            .into()),
        }
    }

    /// 立即过期用户所有有效记录，返回被过期的记录数。
    pub async fn deactivate(&self, user_id: UserId) -> Result<u64, ApplicationError> {
        let now = self.deps.clock.now();
        let expired = self
            .deps
            .presence_repository
            .expire_active(user_id, now)
            .await?;

        if expired == 0 {
            return Err(DomainError::not_found("active proximity", user_id).into());
        }

        info!(user_id = %user_id, expired, "在线位置已关闭");
        Ok(expired)
    }

    /// 更新有效记录的位置；半径只在提供时更新，过期时间不变。
    pub async fn update_location(
        &self,
        request: UpdateLocationRequest,
    ) -> Result<PresenceRecord, ApplicationError> {
        let user_id = request.user_id;
        self.ensure_user_exists(user_id).await?;

        let coordinates = Coordinates::from_parts(request.latitude, request.longitude)?;
        let radius = request.radius.map(RadiusMeters::new).transpose()?;

        let now = self.deps.clock.now();
        let updated = self
            .deps
            .presence_repository
            .update_active_location(user_id, coordinates, radius, now)
            .await?
            .ok_or_else(|| DomainError::not_found("active proximity", user_id))?;

        debug!(user_id = %user_id, presence_id = %updated.id, "在线位置已更新");
        Ok(updated)
    }

    /// 以请求方自己的半径筛选其他用户的有效记录。
    pub async fn nearby(&self, user_id: UserId) -> Result<Vec<NearbyMatch>, ApplicationError> {
        let now = self.deps.clock.now();
        let own = self
            .deps
            .presence_repository
            .find_active_for_user(user_id, now)
            .await?
            .ok_or_else(|| DomainError::not_found("active proximity", user_id))?;

        let others = self
            .deps
            .presence_repository
            .list_active_except(user_id, now)
            .await?;

        let matches: Vec<NearbyMatch> = others
            .iter()
            .filter_map(|other| own.nearby_match(other))
            .collect();

        debug!(
            user_id = %user_id,
            candidates = others.len(),
            matches = matches.len(),
            "附近用户查询完成"
        );
        Ok(matches)
    }

    pub async fn list_active(&self) -> Result<Vec<PresenceRecord>, ApplicationError> {
        let now = self.deps.clock.now();
        Ok(self.deps.presence_repository.list_active(now).await?)
    }

    async fn ensure_user_exists(&self, user_id: UserId) -> Result<(), ApplicationError> {
        if self.deps.user_repository.exists(user_id).await? {
            Ok(())
        } else {
            Err(DomainError::not_found("user", user_id).into())
        }
    }
}
