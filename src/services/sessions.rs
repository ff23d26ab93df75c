use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::cache::EntityCache;
use crate::error::{AppError, AppResult};
use crate::models::{Device, Session, SessionStatus};
use crate::services::events::{DomainEvent, EventBus};
use crate::services::location::LocationResolver;
use crate::services::two_factor::TwoFactorService;
use crate::storage::SessionStore;
use crate::transport::DeviceId;

/// Session lifecycle for a device+user pair: start on login (locked while
/// 2FA is pending), touch on activity, lock/unlock/block under the status
/// transition table, finish on logout. Rows are kept after finishing —
/// session history is the audit trail.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    two_factor: Arc<TwoFactorService>,
    location: Arc<dyn LocationResolver>,
    cache: EntityCache,
    events: EventBus,
    lifetime: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        two_factor: Arc<TwoFactorService>,
        location: Arc<dyn LocationResolver>,
        cache: EntityCache,
        events: EventBus,
        lifetime: Duration,
    ) -> Self {
        Self {
            store,
            two_factor,
            location,
            cache,
            events,
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Login path: a new session for the current device+user. Starts
    /// Locked with a login code while additional verification is pending,
    /// Active otherwise.
    pub async fn refresh(&self, user_id: Uuid, device: &Device, ip: &str) -> AppResult<Session> {
        let location = self.location.locate(ip).await?;
        let pending = self.two_factor.pending(user_id).await?;
        let (status, login_code) = if pending {
            (SessionStatus::Locked, Some(generate_login_code()))
        } else {
            (SessionStatus::Active, None)
        };

        let session = Session::start(
            device.uuid,
            Some(user_id),
            ip.to_string(),
            location,
            status,
            login_code,
        );
        let created = self.store.insert(&session).await?;
        self.cache.put(&created).await;
        self.events.publish(DomainEvent::SessionStarted {
            session: created.clone(),
        });
        if pending {
            self.events
                .publish(DomainEvent::SessionLocked { uuid: created.uuid });
        }
        Ok(created)
    }

    /// Guest tracking: a session with no user, always Active.
    pub async fn start_guest(&self, device: &Device, ip: &str) -> AppResult<Session> {
        let location = self.location.locate(ip).await?;
        let session = Session::start(
            device.uuid,
            None,
            ip.to_string(),
            location,
            SessionStatus::Active,
            None,
        );
        let created = self.store.insert(&session).await?;
        self.cache.put(&created).await;
        self.events.publish(DomainEvent::SessionStarted {
            session: created.clone(),
        });
        Ok(created)
    }

    /// The session bound to the active device+user context; at most one
    /// per request.
    pub async fn current(
        &self,
        device: DeviceId,
        user_id: Option<Uuid>,
    ) -> AppResult<Option<Session>> {
        self.store.current_for(device, user_id).await
    }

    pub async fn by_uuid(&self, uuid: Uuid) -> AppResult<Option<Session>> {
        let key = self.cache.key(&uuid.to_string());
        self.cache
            .remember(&key, || async { self.store.by_uuid(uuid).await })
            .await
    }

    pub async fn by_uuid_or_fail(&self, uuid: Uuid) -> AppResult<Session> {
        self.by_uuid(uuid).await?.ok_or(AppError::SessionNotFound)
    }

    pub async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        self.store.for_user(user_id).await
    }

    pub async fn for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        self.store.for_device(device).await
    }

    pub async fn unfinished_for_device(&self, device: DeviceId) -> AppResult<Vec<Session>> {
        self.store.unfinished_for_device(device).await
    }

    /// Locked sessions of this user on this device that are still inside
    /// the inactivity window — the set a device verification unlocks.
    pub async fn locked_unexpired(
        &self,
        device: DeviceId,
        user_id: Uuid,
    ) -> AppResult<Vec<Session>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.lifetime)
                .unwrap_or_else(|_| chrono::Duration::zero());
        self.store.locked_unexpired(device, user_id, cutoff).await
    }

    pub async fn touch(&self, session: &Session) -> AppResult<Session> {
        let mut updated = session.clone();
        updated.last_activity_at = Utc::now();
        self.persist(updated).await
    }

    pub async fn lock(&self, session: &Session) -> AppResult<Session> {
        self.guard(session, SessionStatus::Locked)?;
        let mut updated = session.clone();
        updated.status = SessionStatus::Locked;
        updated.login_code = Some(generate_login_code());
        let saved = self.persist(updated).await?;
        self.events
            .publish(DomainEvent::SessionLocked { uuid: saved.uuid });
        Ok(saved)
    }

    pub async fn unlock(&self, session: &Session) -> AppResult<Session> {
        self.guard(session, SessionStatus::Active)?;
        let mut updated = session.clone();
        updated.status = SessionStatus::Active;
        updated.login_code = None;
        updated.last_activity_at = Utc::now();
        let saved = self.persist(updated).await?;
        self.events
            .publish(DomainEvent::SessionUnlocked { uuid: saved.uuid });
        Ok(saved)
    }

    /// Blocking always names the actor.
    pub async fn block(&self, session: &Session, blocked_by: Uuid) -> AppResult<Session> {
        self.guard(session, SessionStatus::Blocked)?;
        let mut updated = session.clone();
        updated.status = SessionStatus::Blocked;
        updated.blocked_by = Some(blocked_by);
        let saved = self.persist(updated).await?;
        self.events.publish(DomainEvent::SessionBlocked {
            uuid: saved.uuid,
            blocked_by,
        });
        Ok(saved)
    }

    /// Finish the session. The row is retained for audit unless
    /// `forget_session` asks for removal.
    pub async fn end(&self, session: &Session, forget_session: bool) -> AppResult<Session> {
        self.guard(session, SessionStatus::Finished)?;
        let mut updated = session.clone();
        updated.status = SessionStatus::Finished;
        updated.finished_at = Some(Utc::now());
        let saved = self.persist(updated).await?;
        if forget_session {
            self.store.delete(saved.uuid).await?;
            self.cache.forget(&saved).await;
        }
        self.events
            .publish(DomainEvent::SessionFinished { uuid: saved.uuid });
        Ok(saved)
    }

    fn guard(&self, session: &Session, to: SessionStatus) -> AppResult<()> {
        if session.status.can_transition(to) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                from: session.status,
                to,
            })
        }
    }

    async fn persist(&self, session: Session) -> AppResult<Session> {
        let saved = self.store.update(&session).await?;
        self.cache.forget(&saved).await;
        self.cache.put(&saved).await;
        Ok(saved)
    }
}

fn generate_login_code() -> i32 {
    rand::thread_rng().gen_range(100_000..1_000_000)
}
