use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Device, DeviceStatus, DeviceUser, Session, StatusCount, TwoFactor};
use crate::storage::{DeviceStore, SessionStore, TwoFactorStore};
use crate::transport::DeviceId;

/// Translate a backend unique-constraint violation into the typed error the
/// registries reconcile on; everything else passes through as a database
/// error.
fn map_constraint(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return AppError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    AppError::Database(e)
}

pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn insert(&self, device: &Device) -> AppResult<Device> {
        sqlx::query_as(
            r#"
            INSERT INTO devices (
                uuid, fingerprint, status,
                browser, browser_version, browser_family, browser_engine,
                platform, platform_version, platform_family,
                device_type, device_family, device_model,
                source, ip, risk, metadata,
                created_at, updated_at, verified_at, hijacked_at, risk_assessed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            RETURNING *
            "#,
        )
        .bind(device.uuid)
        .bind(&device.fingerprint)
        .bind(device.status)
        .bind(&device.browser)
        .bind(&device.browser_version)
        .bind(&device.browser_family)
        .bind(&device.browser_engine)
        .bind(&device.platform)
        .bind(&device.platform_version)
        .bind(&device.platform_family)
        .bind(&device.device_type)
        .bind(&device.device_family)
        .bind(&device.device_model)
        .bind(&device.source)
        .bind(&device.ip)
        .bind(&device.risk)
        .bind(&device.metadata)
        .bind(device.created_at)
        .bind(device.updated_at)
        .bind(device.verified_at)
        .bind(device.hijacked_at)
        .bind(device.risk_assessed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint)
    }

    async fn update(&self, device: &Device) -> AppResult<Device> {
        sqlx::query_as(
            r#"
            UPDATE devices SET
                fingerprint = $2, status = $3,
                browser = $4, browser_version = $5, browser_family = $6, browser_engine = $7,
                platform = $8, platform_version = $9, platform_family = $10,
                device_type = $11, device_family = $12, device_model = $13,
                source = $14, ip = $15, risk = $16, metadata = $17,
                updated_at = $18, verified_at = $19, hijacked_at = $20, risk_assessed_at = $21
            WHERE uuid = $1
            RETURNING *
            "#,
        )
        .bind(device.uuid)
        .bind(&device.fingerprint)
        .bind(device.status)
        .bind(&device.browser)
        .bind(&device.browser_version)
        .bind(&device.browser_family)
        .bind(&device.browser_engine)
        .bind(&device.platform)
        .bind(&device.platform_version)
        .bind(&device.platform_family)
        .bind(&device.device_type)
        .bind(&device.device_family)
        .bind(&device.device_model)
        .bind(&device.source)
        .bind(&device.ip)
        .bind(&device.risk)
        .bind(&device.metadata)
        .bind(device.updated_at)
        .bind(device.verified_at)
        .bind(device.hijacked_at)
        .bind(device.risk_assessed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint)
    }

    async fn delete(&self, uuid: DeviceId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn by_uuid(&self, uuid: DeviceId) -> AppResult<Option<Device>> {
        let device = sqlx::query_as("SELECT * FROM devices WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Device>> {
        let device = sqlx::query_as("SELECT * FROM devices WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn devices_for_user(&self, user_id: Uuid) -> AppResult<Vec<Device>> {
        let devices = sqlx::query_as(
            r#"
            SELECT d.* FROM devices d
            JOIN device_users du ON du.device_uuid = d.uuid
            WHERE du.user_id = $1
            ORDER BY d.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    async fn users_for_device(&self, uuid: DeviceId) -> AppResult<Vec<Uuid>> {
        let users = sqlx::query_scalar("SELECT user_id FROM device_users WHERE device_uuid = $1")
            .bind(uuid)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn attach_user(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<DeviceUser> {
        let pivot = sqlx::query_as(
            r#"
            INSERT INTO device_users (device_uuid, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (device_uuid, user_id)
            DO UPDATE SET updated_at = device_users.updated_at
            RETURNING *
            "#,
        )
        .bind(uuid)
        .bind(user_id)
        .bind(DeviceStatus::Unverified)
        .fetch_one(&self.pool)
        .await?;
        Ok(pivot)
    }

    async fn pivot(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<Option<DeviceUser>> {
        let pivot = sqlx::query_as(
            "SELECT * FROM device_users WHERE device_uuid = $1 AND user_id = $2",
        )
        .bind(uuid)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pivot)
    }

    async fn set_pivot_status(
        &self,
        uuid: DeviceId,
        user_id: Uuid,
        status: DeviceStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE device_users
            SET status = $3, verified_at = COALESCE($4, verified_at), updated_at = NOW()
            WHERE device_uuid = $1 AND user_id = $2
            "#,
        )
        .bind(uuid)
        .bind(user_id)
        .bind(status)
        .bind(verified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pivot_status_counts(&self) -> AppResult<Vec<StatusCount>> {
        let counts = sqlx::query_as(
            "SELECT status, COUNT(*) AS total FROM device_users GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn orphans(&self) -> AppResult<Vec<Device>> {
        let devices = sqlx::query_as(
            r#"
            SELECT d.* FROM devices d
            WHERE NOT EXISTS (SELECT 1 FROM device_users du WHERE du.device_uuid = d.uuid)
              AND NOT EXISTS (SELECT 1 FROM device_sessions s WHERE s.device_uuid = d.uuid)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    async fn delete_hijacked(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM devices WHERE status = $1")
            .bind(DeviceStatus::Hijacked)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> AppResult<Session> {
        sqlx::query_as(
            r#"
            INSERT INTO device_sessions (
                uuid, device_uuid, user_id, ip, location, status,
                blocked_by, login_code, started_at, last_activity_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(session.uuid)
        .bind(session.device_uuid)
        .bind(session.user_id)
        .bind(&session.ip)
        .bind(&session.location)
        .bind(session.status)
        .bind(session.blocked_by)
        .bind(session.login_code)
        .bind(session.started_at)
        .bind(session.last_activity_at)
        .bind(session.finished_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint)
    }

    async fn update(&self, session: &Session) -> AppResult<Session> {
        sqlx::query_as(
            r#"
            UPDATE device_sessions SET
                ip = $2, location = $3, status = $4, blocked_by = $5,
                login_code = $6, last_activity_at = $7, finished_at = $8
            WHERE uuid = $1
            RETURNING *
            "#,
        )
        .bind(session.uuid)
        .bind(&session.ip)
        .bind(&session.location)
        .bind(session.status)
        .bind(session.blocked_by)
        .bind(session.login_code)
        .bind(session.last_activity_at)
        .bind(session.finished_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint)
    }

    async fn delete(&self, uuid: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM device_sessions WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn by_uuid(&self, uuid: Uuid) -> AppResult<Option<Session>> {
        let session = sqlx::query_as("SELECT * FROM device_sessions WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn current_for(
        &self,
        device: DeviceId,
        user_id: Option<Uuid>,
    ) -> AppResult<Option<Session>> {
        let session = sqlx::query_as(
            r#"
            SELECT * FROM device_sessions
            WHERE device_uuid = $1
              AND user_id IS NOT DISTINCT FROM $2
              AND status <> $3
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(device)
        .bind(user_id)
        .bind(crate::models::SessionStatus::Finished)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        let sessions = sqlx::query_as(
            "SELECT * FROM device_sessions WHERE user_id = $1 ORDER BY started_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        let sessions = sqlx::query_as(
            "SELECT * FROM device_sessions WHERE device_uuid = $1 ORDER BY started_at DESC",
        )
        .bind(device)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn unfinished_for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        let sessions = sqlx::query_as(
            "SELECT * FROM device_sessions WHERE device_uuid = $1 AND status <> $2",
        )
        .bind(device)
        .bind(crate::models::SessionStatus::Finished)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn locked_unexpired(
        &self,
        device: DeviceId,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Session>> {
        let sessions = sqlx::query_as(
            r#"
            SELECT * FROM device_sessions
            WHERE device_uuid = $1 AND user_id = $2 AND status = $3
              AND last_activity_at > $4
            "#,
        )
        .bind(device)
        .bind(user_id)
        .bind(crate::models::SessionStatus::Locked)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}

pub struct PgTwoFactorStore {
    pool: PgPool,
}

impl PgTwoFactorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TwoFactorStore for PgTwoFactorStore {
    async fn for_user(&self, user_id: Uuid) -> AppResult<Option<TwoFactor>> {
        let record = sqlx::query_as("SELECT * FROM two_factor WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn upsert(&self, record: &TwoFactor) -> AppResult<TwoFactor> {
        let record = sqlx::query_as(
            r#"
            INSERT INTO two_factor (user_id, enabled, secret, last_success_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET enabled = $2, secret = $3, last_success_at = $4, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(record.user_id)
        .bind(record.enabled)
        .bind(&record.secret)
        .bind(record.last_success_at)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}
