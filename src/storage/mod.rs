use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Device, DeviceStatus, DeviceUser, Session, StatusCount, TwoFactor};
use crate::transport::DeviceId;

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod redis;

/// Storage capability for device rows and the (device, user) pivot.
/// Implementations translate backend unique-constraint violations into
/// `AppError::UniqueViolation` so callers can reconcile duplicates instead
/// of surfacing raw storage errors.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn insert(&self, device: &Device) -> AppResult<Device>;
    async fn update(&self, device: &Device) -> AppResult<Device>;
    async fn delete(&self, uuid: DeviceId) -> AppResult<bool>;
    async fn by_uuid(&self, uuid: DeviceId) -> AppResult<Option<Device>>;
    async fn by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Device>>;
    async fn devices_for_user(&self, user_id: Uuid) -> AppResult<Vec<Device>>;
    async fn users_for_device(&self, uuid: DeviceId) -> AppResult<Vec<Uuid>>;
    /// Idempotent: an existing pivot is returned unchanged.
    async fn attach_user(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<DeviceUser>;
    async fn pivot(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<Option<DeviceUser>>;
    /// `verified_at` only overwrites when `Some`; hijacking keeps the old
    /// verification stamp for the audit trail.
    async fn set_pivot_status(
        &self,
        uuid: DeviceId,
        user_id: Uuid,
        status: DeviceStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;
    async fn pivot_status_counts(&self) -> AppResult<Vec<StatusCount>>;
    /// Devices with no linked users. The registry additionally filters out
    /// devices that still have session history before treating one as an
    /// orphan.
    async fn orphans(&self) -> AppResult<Vec<Device>>;
    async fn delete_hijacked(&self) -> AppResult<u64>;
}

/// Storage capability for session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> AppResult<Session>;
    async fn update(&self, session: &Session) -> AppResult<Session>;
    async fn delete(&self, uuid: Uuid) -> AppResult<bool>;
    async fn by_uuid(&self, uuid: Uuid) -> AppResult<Option<Session>>;
    /// Latest unfinished session for the device+user pair — the "current"
    /// session of a request context.
    async fn current_for(
        &self,
        device: DeviceId,
        user_id: Option<Uuid>,
    ) -> AppResult<Option<Session>>;
    async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>>;
    async fn for_device(&self, device: DeviceId) -> AppResult<Vec<Session>>;
    async fn unfinished_for_device(&self, device: DeviceId) -> AppResult<Vec<Session>>;
    async fn locked_unexpired(
        &self,
        device: DeviceId,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Session>>;
}

#[async_trait]
pub trait TwoFactorStore: Send + Sync {
    async fn for_user(&self, user_id: Uuid) -> AppResult<Option<TwoFactor>>;
    async fn upsert(&self, record: &TwoFactor) -> AppResult<TwoFactor>;
}
