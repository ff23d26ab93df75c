use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::cache::{self, Cacheable};
use crate::models::Location;
use crate::transport::DeviceId;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub uuid: Uuid,
    pub device_uuid: DeviceId,
    pub user_id: Option<Uuid>,
    pub ip: String,
    pub location: Json<Location>,
    pub status: SessionStatus,
    pub blocked_by: Option<Uuid>,
    pub login_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn start(
        device_uuid: DeviceId,
        user_id: Option<Uuid>,
        ip: String,
        location: Location,
        status: SessionStatus,
        login_code: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            device_uuid,
            user_id,
            ip,
            location: Json(location),
            status,
            blocked_by: None,
            login_code,
            started_at: now,
            last_activity_at: now,
            finished_at: None,
        }
    }

    pub fn finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Inactivity expiry: no touch within the configured lifetime.
    pub fn expired(&self, lifetime: Duration) -> bool {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());
        self.last_activity_at < cutoff
    }
}

impl Cacheable for Session {
    fn cache_key(&self) -> String {
        cache::key(cache::SESSION_PREFIX, &self.uuid.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Locked,
    Blocked,
    Finished,
}

impl SessionStatus {
    /// Legal lifecycle moves. Finished is terminal; Blocked only ends.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Active, Locked)
                | (Active, Blocked)
                | (Active, Finished)
                | (Locked, Active)
                | (Locked, Blocked)
                | (Locked, Finished)
                | (Blocked, Finished)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Active => "active",
            SessionStatus::Locked => "locked",
            SessionStatus::Blocked => "blocked",
            SessionStatus::Finished => "finished",
        };
        f.write_str(name)
    }
}
