use std::sync::Arc;
use std::time::Duration;

use application::repository::{
    AvailabilityRepository, ChatRestrictionRepository, ChatWindowRepository,
    CreatePresenceOutcome, PresenceRepository, UserRepository,
};
use async_trait::async_trait;
use config::DatabaseConfig;
use domain::{
    AvailabilityId, AvailabilitySlot, ChatRestriction, ChatWindow, ChatWindowId, Coordinates,
    PresenceRecord, RadiusMeters, RepositoryError, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

const PRESENCE_COLUMNS: &str =
    "id, user_id, availability_id, latitude, longitude, radius_meters, created_at, expires_at";

#[derive(Debug, FromRow)]
struct PresenceRow {
    id: Uuid,
    user_id: Uuid,
    availability_id: Uuid,
    latitude: f64,
    longitude: f64,
    radius_meters: f64,
    created_at: Timestamp,
    expires_at: Timestamp,
}

impl From<PresenceRow> for PresenceRecord {
    fn from(value: PresenceRow) -> Self {
        PresenceRecord {
            id: value.id.into(),
            user_id: value.user_id.into(),
            availability_id: value.availability_id.into(),
            latitude: value.latitude,
            longitude: value.longitude,
            radius_meters: value.radius_meters,
            created_at: value.created_at,
            expires_at: value.expires_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AvailabilityRow {
    id: Uuid,
    user_id: Uuid,
    date: String,
    start_time: String,
    end_time: String,
    is_available: bool,
    location: String,
}

impl From<AvailabilityRow> for AvailabilitySlot {
    fn from(value: AvailabilityRow) -> Self {
        AvailabilitySlot {
            id: value.id.into(),
            user_id: value.user_id.into(),
            date: value.date,
            start_time: value.start_time,
            end_time: value.end_time,
            is_available: value.is_available,
            location: value.location,
        }
    }
}

#[derive(Debug, FromRow)]
struct ChatWindowRow {
    id: Uuid,
    participant_ids: Vec<Uuid>,
    is_group: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<ChatWindowRow> for ChatWindow {
    fn from(value: ChatWindowRow) -> Self {
        ChatWindow {
            id: value.id.into(),
            participant_ids: value.participant_ids.into_iter().map(UserId::from).collect(),
            is_group: value.is_group,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RestrictionRow {
    id: Uuid,
    chat_window_id: Uuid,
    restriction_type: String,
    restricted_by: Uuid,
    created_at: Timestamp,
}

impl From<RestrictionRow> for ChatRestriction {
    fn from(value: RestrictionRow) -> Self {
        ChatRestriction {
            id: value.id.into(),
            chat_window_id: value.chat_window_id.into(),
            restriction_type: value.restriction_type,
            restricted_by: value.restricted_by.into(),
            created_at: value.created_at,
        }
    }
}

/// 在线位置记录的 Postgres 实现。
///
/// 创建时在事务内对用户ID加咨询锁，再检查并插入，
/// 同一用户的并发激活会在锁上排队。
pub struct PgPresenceRepository {
    pool: PgPool,
}

impl PgPresenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceRepository for PgPresenceRepository {
    async fn create_if_none_active(
        &self,
        record: PresenceRecord,
        now: Timestamp,
    ) -> Result<CreatePresenceOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(record.user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM presence_records WHERE user_id = $1 AND expires_at > $2",
        )
        .bind(Uuid::from(record.user_id))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if active > 0 {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(CreatePresenceOutcome::ActiveExists);
        }

        let row = sqlx::query_as::<_, PresenceRow>(&format!(
            r#"
            INSERT INTO presence_records ({PRESENCE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PRESENCE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(record.id))
        .bind(Uuid::from(record.user_id))
        .bind(Uuid::from(record.availability_id))
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.radius_meters)
        .bind(record.created_at)
        .bind(record.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(CreatePresenceOutcome::Created(row.into()))
    }

    async fn expire_active(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE presence_records SET expires_at = $2 WHERE user_id = $1 AND expires_at > $2",
        )
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn update_active_location(
        &self,
        user_id: UserId,
        coordinates: Coordinates,
        radius: Option<RadiusMeters>,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, PresenceRow>(&format!(
            r#"
            UPDATE presence_records
            SET latitude = $2, longitude = $3, radius_meters = COALESCE($4, radius_meters)
            WHERE id = (
                SELECT id FROM presence_records
                WHERE user_id = $1 AND expires_at > $5
                ORDER BY created_at DESC
                LIMIT 1
            )
            RETURNING {PRESENCE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user_id))
        .bind(coordinates.latitude)
        .bind(coordinates.longitude)
        .bind(radius.map(|radius| radius.value()))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(PresenceRecord::from))
    }

    async fn find_active_for_user(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Option<PresenceRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, PresenceRow>(&format!(
            r#"
            SELECT {PRESENCE_COLUMNS} FROM presence_records
            WHERE user_id = $1 AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(Uuid::from(user_id))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(PresenceRecord::from))
    }

    async fn list_active(&self, now: Timestamp) -> Result<Vec<PresenceRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, PresenceRow>(&format!(
            "SELECT {PRESENCE_COLUMNS} FROM presence_records WHERE expires_at > $1 ORDER BY created_at, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(PresenceRecord::from).collect())
    }

    async fn list_active_except(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Vec<PresenceRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, PresenceRow>(&format!(
            r#"
            SELECT {PRESENCE_COLUMNS} FROM presence_records
            WHERE user_id <> $1 AND expires_at > $2
            ORDER BY created_at, id
            "#
        ))
        .bind(Uuid::from(user_id))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(PresenceRecord::from).collect())
    }
}

pub struct PgAvailabilityRepository {
    pool: PgPool,
}

impl PgAvailabilityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityRepository for PgAvailabilityRepository {
    async fn find_owned(
        &self,
        id: AvailabilityId,
        user_id: UserId,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        let row = sqlx::query_as::<_, AvailabilityRow>(
            r#"
            SELECT id, user_id, date, start_time, end_time, is_available, location
            FROM availabilities
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(AvailabilitySlot::from))
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }
}

pub struct PgChatWindowRepository {
    pool: PgPool,
}

impl PgChatWindowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatWindowRepository for PgChatWindowRepository {
    async fn create(&self, window: ChatWindow) -> Result<ChatWindow, RepositoryError> {
        let participant_ids: Vec<Uuid> = window.participant_ids.iter().copied().map(Uuid::from).collect();
        let row = sqlx::query_as::<_, ChatWindowRow>(
            r#"
            INSERT INTO chat_windows (id, participant_ids, is_group, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, participant_ids, is_group, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(window.id))
        .bind(participant_ids)
        .bind(window.is_group)
        .bind(window.created_at)
        .bind(window.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: ChatWindowId) -> Result<Option<ChatWindow>, RepositoryError> {
        let row = sqlx::query_as::<_, ChatWindowRow>(
            "SELECT id, participant_ids, is_group, created_at, updated_at FROM chat_windows WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(ChatWindow::from))
    }

    async fn list_by_participant(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChatWindow>, RepositoryError> {
        let rows = sqlx::query_as::<_, ChatWindowRow>(
            r#"
            SELECT id, participant_ids, is_group, created_at, updated_at
            FROM chat_windows
            WHERE $1 = ANY(participant_ids)
            ORDER BY created_at, id
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(ChatWindow::from).collect())
    }
}

pub struct PgChatRestrictionRepository {
    pool: PgPool,
}

impl PgChatRestrictionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRestrictionRepository for PgChatRestrictionRepository {
    async fn create(
        &self,
        restriction: ChatRestriction,
    ) -> Result<ChatRestriction, RepositoryError> {
        let row = sqlx::query_as::<_, RestrictionRow>(
            r#"
            INSERT INTO chat_restrictions (id, chat_window_id, restriction_type, restricted_by, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, chat_window_id, restriction_type, restricted_by, created_at
            "#,
        )
        .bind(Uuid::from(restriction.id))
        .bind(Uuid::from(restriction.chat_window_id))
        .bind(&restriction.restriction_type)
        .bind(Uuid::from(restriction.restricted_by))
        .bind(restriction.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub presence_repository: Arc<PgPresenceRepository>,
    pub availability_repository: Arc<PgAvailabilityRepository>,
    pub user_repository: Arc<PgUserRepository>,
    pub chat_window_repository: Arc<PgChatWindowRepository>,
    pub restriction_repository: Arc<PgChatRestrictionRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            presence_repository: Arc::new(PgPresenceRepository::new(pool.clone())),
            availability_repository: Arc::new(PgAvailabilityRepository::new(pool.clone())),
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            chat_window_repository: Arc::new(PgChatWindowRepository::new(pool.clone())),
            restriction_repository: Arc::new(PgChatRestrictionRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
}
