use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::TwoFactor;
use crate::storage::TwoFactorStore;

/// Per-user two-factor state. Secret generation and code validation live in
/// the external authenticator; this service only tracks whether a login
/// must start locked and when a challenge last succeeded.
pub struct TwoFactorService {
    store: Arc<dyn TwoFactorStore>,
}

impl TwoFactorService {
    pub fn new(store: Arc<dyn TwoFactorStore>) -> Self {
        Self { store }
    }

    pub async fn pending(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .store
            .for_user(user_id)
            .await?
            .map(|record| record.pending())
            .unwrap_or(false))
    }

    pub async fn enable(&self, user_id: Uuid, secret: String) -> AppResult<TwoFactor> {
        let mut record = self
            .store
            .for_user(user_id)
            .await?
            .unwrap_or_else(|| TwoFactor::new(user_id));
        record.enabled = true;
        record.secret = Some(secret);
        record.last_success_at = None;
        self.store.upsert(&record).await
    }

    pub async fn disable(&self, user_id: Uuid) -> AppResult<TwoFactor> {
        let mut record = self
            .store
            .for_user(user_id)
            .await?
            .unwrap_or_else(|| TwoFactor::new(user_id));
        record.enabled = false;
        record.last_success_at = None;
        self.store.upsert(&record).await
    }

    pub async fn confirm(&self, user_id: Uuid) -> AppResult<()> {
        if let Some(mut record) = self.store.for_user(user_id).await? {
            record.last_success_at = Some(Utc::now());
            self.store.upsert(&record).await?;
        }
        Ok(())
    }
}
