use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Device, DeviceStatus, DeviceUser, Session, SessionStatus, StatusCount, TwoFactor,
};
use crate::storage::{DeviceStore, SessionStore, TwoFactorStore};
use crate::transport::DeviceId;

/// In-memory device store for tests. Enforces the same unique constraints
/// as the migrations so duplicate/race paths behave like Postgres.
#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: Mutex<HashMap<DeviceId, Device>>,
    pivots: Mutex<HashMap<(DeviceId, Uuid), DeviceUser>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint_taken(&self, fingerprint: &str, except: DeviceId) -> bool {
        self.devices
            .lock()
            .expect("device map poisoned")
            .values()
            .any(|d| d.uuid != except && d.fingerprint.as_deref() == Some(fingerprint))
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn insert(&self, device: &Device) -> AppResult<Device> {
        if self.devices.lock().expect("device map poisoned").contains_key(&device.uuid) {
            return Err(AppError::UniqueViolation {
                constraint: "devices_pkey".to_string(),
            });
        }
        if let Some(fp) = &device.fingerprint {
            if self.fingerprint_taken(fp, device.uuid) {
                return Err(AppError::UniqueViolation {
                    constraint: "devices_fingerprint_key".to_string(),
                });
            }
        }
        self.devices
            .lock()
            .expect("device map poisoned")
            .insert(device.uuid, device.clone());
        Ok(device.clone())
    }

    async fn update(&self, device: &Device) -> AppResult<Device> {
        if let Some(fp) = &device.fingerprint {
            if self.fingerprint_taken(fp, device.uuid) {
                return Err(AppError::UniqueViolation {
                    constraint: "devices_fingerprint_key".to_string(),
                });
            }
        }
        let mut devices = self.devices.lock().expect("device map poisoned");
        if !devices.contains_key(&device.uuid) {
            return Err(AppError::DeviceNotFound);
        }
        devices.insert(device.uuid, device.clone());
        Ok(device.clone())
    }

    async fn delete(&self, uuid: DeviceId) -> AppResult<bool> {
        let removed = self
            .devices
            .lock()
            .expect("device map poisoned")
            .remove(&uuid)
            .is_some();
        if removed {
            self.pivots
                .lock()
                .expect("pivot map poisoned")
                .retain(|(device, _), _| *device != uuid);
        }
        Ok(removed)
    }

    async fn by_uuid(&self, uuid: DeviceId) -> AppResult<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .expect("device map poisoned")
            .get(&uuid)
            .cloned())
    }

    async fn by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .expect("device map poisoned")
            .values()
            .find(|d| d.fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn devices_for_user(&self, user_id: Uuid) -> AppResult<Vec<Device>> {
        let pivots = self.pivots.lock().expect("pivot map poisoned");
        let devices = self.devices.lock().expect("device map poisoned");
        Ok(pivots
            .keys()
            .filter(|(_, user)| *user == user_id)
            .filter_map(|(device, _)| devices.get(device).cloned())
            .collect())
    }

    async fn users_for_device(&self, uuid: DeviceId) -> AppResult<Vec<Uuid>> {
        Ok(self
            .pivots
            .lock()
            .expect("pivot map poisoned")
            .keys()
            .filter(|(device, _)| *device == uuid)
            .map(|(_, user)| *user)
            .collect())
    }

    async fn attach_user(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<DeviceUser> {
        let mut pivots = self.pivots.lock().expect("pivot map poisoned");
        let now = Utc::now();
        let pivot = pivots
            .entry((uuid, user_id))
            .or_insert_with(|| DeviceUser {
                device_uuid: uuid,
                user_id,
                status: DeviceStatus::Unverified,
                verified_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(pivot.clone())
    }

    async fn pivot(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<Option<DeviceUser>> {
        Ok(self
            .pivots
            .lock()
            .expect("pivot map poisoned")
            .get(&(uuid, user_id))
            .cloned())
    }

    async fn set_pivot_status(
        &self,
        uuid: DeviceId,
        user_id: Uuid,
        status: DeviceStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut pivots = self.pivots.lock().expect("pivot map poisoned");
        if let Some(pivot) = pivots.get_mut(&(uuid, user_id)) {
            pivot.status = status;
            if verified_at.is_some() {
                pivot.verified_at = verified_at;
            }
            pivot.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn pivot_status_counts(&self) -> AppResult<Vec<StatusCount>> {
        let pivots = self.pivots.lock().expect("pivot map poisoned");
        let mut counts: HashMap<DeviceStatus, i64> = HashMap::new();
        for pivot in pivots.values() {
            *counts.entry(pivot.status).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(status, total)| StatusCount { status, total })
            .collect())
    }

    async fn orphans(&self) -> AppResult<Vec<Device>> {
        // This store does not see sessions; the registry filters devices
        // with session history before deleting, same as it does for the
        // Postgres store's pre-filtered result.
        let pivots = self.pivots.lock().expect("pivot map poisoned");
        Ok(self
            .devices
            .lock()
            .expect("device map poisoned")
            .values()
            .filter(|d| !pivots.keys().any(|(device, _)| *device == d.uuid))
            .cloned()
            .collect())
    }

    async fn delete_hijacked(&self) -> AppResult<u64> {
        let mut devices = self.devices.lock().expect("device map poisoned");
        let hijacked: Vec<DeviceId> = devices
            .values()
            .filter(|d| d.status == DeviceStatus::Hijacked)
            .map(|d| d.uuid)
            .collect();
        for uuid in &hijacked {
            devices.remove(uuid);
        }
        self.pivots
            .lock()
            .expect("pivot map poisoned")
            .retain(|(device, _), _| !hijacked.contains(device));
        Ok(hijacked.len() as u64)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> AppResult<Session> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        if sessions.contains_key(&session.uuid) {
            return Err(AppError::UniqueViolation {
                constraint: "device_sessions_pkey".to_string(),
            });
        }
        sessions.insert(session.uuid, session.clone());
        Ok(session.clone())
    }

    async fn update(&self, session: &Session) -> AppResult<Session> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        if !sessions.contains_key(&session.uuid) {
            return Err(AppError::SessionNotFound);
        }
        sessions.insert(session.uuid, session.clone());
        Ok(session.clone())
    }

    async fn delete(&self, uuid: Uuid) -> AppResult<bool> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .remove(&uuid)
            .is_some())
    }

    async fn by_uuid(&self, uuid: Uuid) -> AppResult<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .get(&uuid)
            .cloned())
    }

    async fn current_for(
        &self,
        device: DeviceId,
        user_id: Option<Uuid>,
    ) -> AppResult<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .filter(|s| {
                s.device_uuid == device && s.user_id == user_id && !s.finished()
            })
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .filter(|s| s.user_id == Some(user_id))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        Ok(sessions)
    }

    async fn for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .filter(|s| s.device_uuid == device)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        Ok(sessions)
    }

    async fn unfinished_for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .filter(|s| s.device_uuid == device && !s.finished())
            .cloned()
            .collect())
    }

    async fn locked_unexpired(
        &self,
        device: DeviceId,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Session>> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .filter(|s| {
                s.device_uuid == device
                    && s.user_id == Some(user_id)
                    && s.status == SessionStatus::Locked
                    && s.last_activity_at > cutoff
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTwoFactorStore {
    records: Mutex<HashMap<Uuid, TwoFactor>>,
}

impl MemoryTwoFactorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwoFactorStore for MemoryTwoFactorStore {
    async fn for_user(&self, user_id: Uuid) -> AppResult<Option<TwoFactor>> {
        Ok(self
            .records
            .lock()
            .expect("two factor map poisoned")
            .get(&user_id)
            .cloned())
    }

    async fn upsert(&self, record: &TwoFactor) -> AppResult<TwoFactor> {
        self.records
            .lock()
            .expect("two factor map poisoned")
            .insert(record.user_id, record.clone());
        Ok(record.clone())
    }
}
