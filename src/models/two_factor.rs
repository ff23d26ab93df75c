use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user two-factor state. A user with 2FA pending logs in to a Locked
/// session until the login code is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TwoFactor {
    pub user_id: Uuid,
    pub enabled: bool,
    pub secret: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TwoFactor {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            enabled: false,
            secret: None,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pending(&self) -> bool {
        self.enabled && self.secret.is_some()
    }
}
