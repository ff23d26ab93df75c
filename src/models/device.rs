use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::cache::{self, Cacheable};
use crate::transport::DeviceId;

/// Canonical device record. The uuid is issued once and never changes; the
/// fingerprint may arrive later and is unique across devices when set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub uuid: DeviceId,
    pub fingerprint: Option<String>,
    pub status: DeviceStatus,
    pub browser: String,
    pub browser_version: String,
    pub browser_family: String,
    pub browser_engine: String,
    pub platform: String,
    pub platform_version: String,
    pub platform_family: String,
    pub device_type: String,
    pub device_family: String,
    pub device_model: String,
    pub source: String,
    pub ip: String,
    pub risk: Json<Risk>,
    pub metadata: Json<BTreeMap<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub hijacked_at: Option<DateTime<Utc>>,
    pub risk_assessed_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(
        uuid: DeviceId,
        profile: DeviceProfile,
        ip: String,
        fingerprint: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            fingerprint,
            status: DeviceStatus::Unverified,
            browser: profile.browser,
            browser_version: profile.browser_version,
            browser_family: profile.browser_family,
            browser_engine: profile.browser_engine,
            platform: profile.platform,
            platform_version: profile.platform_version,
            platform_family: profile.platform_family,
            device_type: profile.device_type,
            device_family: profile.device_family,
            device_model: profile.device_model,
            source: profile.user_agent,
            ip,
            risk: Json(Risk::default()),
            metadata: Json(BTreeMap::new()),
            created_at: now,
            updated_at: now,
            verified_at: None,
            hijacked_at: None,
            risk_assessed_at: None,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.device_family, self.device_model)
    }

    pub fn fingerprinted(&self) -> bool {
        self.fingerprint.is_some()
    }

    pub fn hijacked(&self) -> bool {
        self.hijacked_at.is_some()
    }

    /// Whether the descriptive fields still match a freshly parsed profile.
    pub fn matches_profile(&self, profile: &DeviceProfile) -> bool {
        self.browser == profile.browser
            && self.browser_family == profile.browser_family
            && self.browser_engine == profile.browser_engine
            && self.platform == profile.platform
            && self.platform_family == profile.platform_family
            && self.device_type == profile.device_type
            && self.device_family == profile.device_family
            && self.device_model == profile.device_model
    }
}

impl Cacheable for Device {
    fn cache_key(&self) -> String {
        cache::key(cache::DEVICE_PREFIX, &self.uuid.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unverified,
    Verified,
    Hijacked,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Unverified
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceStatus::Unverified => "unverified",
            DeviceStatus::Verified => "verified",
            DeviceStatus::Hijacked => "hijacked",
        };
        f.write_str(name)
    }
}

/// Per (device, user) relationship row. Trust state lives here: the same
/// device can be verified for one user and hijacked for another.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceUser {
    pub device_uuid: DeviceId,
    pub user_id: Uuid,
    pub status: DeviceStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Descriptive fields parsed from a user agent, used to populate a new
/// device record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub browser: String,
    pub browser_version: String,
    pub browser_family: String,
    pub browser_engine: String,
    pub platform: String,
    pub platform_version: String,
    pub platform_family: String,
    pub device_type: String,
    pub device_family: String,
    pub device_model: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub score: f64,
    pub factors: BTreeMap<String, Value>,
}

impl Default for Risk {
    fn default() -> Self {
        Self {
            score: 0.0,
            factors: BTreeMap::new(),
        }
    }
}

/// One row of the pivot-status aggregate.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusCount {
    pub status: DeviceStatus,
    pub total: i64,
}
