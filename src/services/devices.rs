use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::EntityCache;
use crate::error::{AppError, AppResult};
use crate::models::{Device, DeviceProfile, DeviceStatus, DeviceUser, SessionStatus, StatusCount};
use crate::services::events::{DomainEvent, EventBus};
use crate::services::sessions::SessionRegistry;
use crate::storage::DeviceStore;
use crate::transport::DeviceId;

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub orphaned: u64,
    pub hijacked: u64,
}

/// Single source of truth for device identity and trust state. All reads
/// go cache-first; every write path evicts before repopulating so a
/// completed write is never shadowed by a stale entry. Session fallout of
/// trust changes (unlock on verify, block on hijack, finish on forget)
/// goes through the session registry so its guards and caches hold.
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    sessions: Arc<SessionRegistry>,
    cache: EntityCache,
    user_devices: EntityCache,
    events: EventBus,
}

impl DeviceRegistry {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        sessions: Arc<SessionRegistry>,
        cache: EntityCache,
        user_devices: EntityCache,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            sessions,
            cache,
            user_devices,
            events,
        }
    }

    /// Idempotent registration. An existing device is returned unchanged;
    /// losing a concurrent insert race resolves to the winner's row, and a
    /// fingerprint collision surfaces the conflicting device.
    pub async fn register(
        &self,
        uuid: DeviceId,
        profile: DeviceProfile,
        ip: &str,
        fingerprint: Option<String>,
    ) -> AppResult<Device> {
        if let Some(existing) = self.store.by_uuid(uuid).await? {
            return Ok(existing);
        }

        let device = Device::new(uuid, profile, ip.to_string(), fingerprint);
        match self.store.insert(&device).await {
            Ok(created) => {
                self.cache.put(&created).await;
                self.events.publish(DomainEvent::DeviceCreated {
                    device: created.clone(),
                });
                Ok(created)
            }
            Err(AppError::UniqueViolation { constraint })
                if constraint.contains("fingerprint") =>
            {
                let fingerprint = device.fingerprint.as_deref().unwrap_or_default();
                let existing = self
                    .store
                    .by_fingerprint(fingerprint)
                    .await?
                    .ok_or(AppError::DeviceNotFound)?;
                Err(AppError::FingerprintDuplicated {
                    existing: Box::new(existing),
                })
            }
            Err(AppError::UniqueViolation { .. }) => {
                // Lost the insert race for this uuid; the winner's row is
                // the device.
                self.store
                    .by_uuid(uuid)
                    .await?
                    .ok_or(AppError::DeviceNotFound)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn by_uuid(&self, uuid: DeviceId, cached: bool) -> AppResult<Option<Device>> {
        if !cached {
            return self.store.by_uuid(uuid).await;
        }
        let key = self.cache.key(&uuid.to_string());
        self.cache
            .remember(&key, || async { self.store.by_uuid(uuid).await })
            .await
    }

    pub async fn by_uuid_or_fail(&self, uuid: DeviceId) -> AppResult<Device> {
        self.by_uuid(uuid, true)
            .await?
            .ok_or(AppError::DeviceNotFound)
    }

    pub async fn by_fingerprint(
        &self,
        fingerprint: &str,
        cached: bool,
    ) -> AppResult<Option<Device>> {
        if !cached {
            return self.store.by_fingerprint(fingerprint).await;
        }
        let key = self.cache.key(fingerprint);
        self.cache
            .remember(&key, || async {
                self.store.by_fingerprint(fingerprint).await
            })
            .await
    }

    /// Set or replace the fingerprint. A uniqueness violation comes back as
    /// `FingerprintDuplicated` carrying the existing device so the caller
    /// can merge or redirect instead of crashing.
    pub async fn fingerprint(&self, device: &Device, fingerprint: &str) -> AppResult<Device> {
        let mut updated = device.clone();
        updated.fingerprint = Some(fingerprint.to_string());

        match self.save(device, updated).await {
            Ok(saved) => {
                self.events.publish(DomainEvent::DeviceFingerprinted {
                    device: saved.clone(),
                });
                Ok(saved)
            }
            Err(AppError::UniqueViolation { .. }) => {
                let existing = self
                    .store
                    .by_fingerprint(fingerprint)
                    .await?
                    .ok_or(AppError::DeviceNotFound)?;
                Err(AppError::FingerprintDuplicated {
                    existing: Box::new(existing),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn attach_user(&self, device: &Device, user_id: Uuid) -> AppResult<DeviceUser> {
        let pivot = self.store.attach_user(device.uuid, user_id).await?;
        self.user_devices
            .forget_key(&self.user_devices.key(&user_id.to_string()))
            .await;
        Ok(pivot)
    }

    pub async fn pivot(&self, device: &Device, user_id: Uuid) -> AppResult<Option<DeviceUser>> {
        self.store.pivot(device.uuid, user_id).await
    }

    /// Mark the (device, user) pair verified and unlock that user's locked,
    /// unexpired sessions on this device. Other users of the device are
    /// untouched.
    pub async fn verify(&self, device: &Device, user_id: Uuid) -> AppResult<Device> {
        let now = Utc::now();
        self.store.attach_user(device.uuid, user_id).await?;
        self.store
            .set_pivot_status(device.uuid, user_id, DeviceStatus::Verified, Some(now))
            .await?;

        let mut updated = device.clone();
        updated.verified_at = Some(now);
        let saved = self.save(device, updated).await?;

        for session in self.sessions.locked_unexpired(device.uuid, user_id).await? {
            self.sessions.unlock(&session).await?;
        }

        self.events.publish(DomainEvent::DeviceVerified {
            uuid: saved.uuid,
            user_id,
        });
        Ok(saved)
    }

    /// Hijack response: the acting pair is marked hijacked and every open
    /// session on the device is blocked, no matter which user owns it.
    pub async fn hijack(&self, device: &Device, user_id: Uuid) -> AppResult<Device> {
        let now = Utc::now();
        self.store.attach_user(device.uuid, user_id).await?;
        self.store
            .set_pivot_status(device.uuid, user_id, DeviceStatus::Hijacked, None)
            .await?;

        let mut updated = device.clone();
        updated.status = DeviceStatus::Hijacked;
        updated.hijacked_at = Some(now);
        let saved = self.save(device, updated).await?;

        for session in self.sessions.unfinished_for_device(device.uuid).await? {
            if session.status.can_transition(SessionStatus::Blocked) {
                self.sessions.block(&session, user_id).await?;
            }
        }

        self.events.publish(DomainEvent::DeviceHijacked {
            uuid: saved.uuid,
            user_id,
        });
        Ok(saved)
    }

    /// End every open session (rows retained for audit), then delete the
    /// device and every cache entry that could resurrect it.
    pub async fn forget(&self, device: &Device) -> AppResult<bool> {
        for session in self.sessions.unfinished_for_device(device.uuid).await? {
            self.sessions.end(&session, false).await?;
        }

        // Evict before the delete: the pivot rows are still readable here
        // and name every user listing that references this device.
        self.evict(device).await;

        let deleted = self.store.delete(device.uuid).await?;
        if deleted {
            self.events
                .publish(DomainEvent::DeviceDeleted { uuid: device.uuid });
        }
        Ok(deleted)
    }

    pub async fn user_devices(&self, user_id: Uuid) -> AppResult<Vec<Device>> {
        let key = self.user_devices.key(&user_id.to_string());
        let devices = self
            .user_devices
            .remember(&key, || async {
                self.store.devices_for_user(user_id).await.map(Some)
            })
            .await?;
        Ok(devices.unwrap_or_default())
    }

    /// Trust-state aggregate over (device, user) pivots.
    pub async fn by_status(&self) -> AppResult<Vec<StatusCount>> {
        self.store.pivot_status_counts().await
    }

    /// Devices with no linked users and no session history.
    pub async fn orphans(&self) -> AppResult<Vec<Device>> {
        let mut orphans = Vec::new();
        for device in self.store.orphans().await? {
            if self.sessions.for_device(device.uuid).await?.is_empty() {
                orphans.push(device);
            }
        }
        Ok(orphans)
    }

    /// Cleanup entrypoint: orphans always go; hijacked devices only under
    /// force.
    pub async fn cleanup(&self, force: bool) -> AppResult<CleanupReport> {
        let mut orphaned = 0;
        for device in self.orphans().await? {
            self.evict(&device).await;
            if self.store.delete(device.uuid).await? {
                self.events
                    .publish(DomainEvent::DeviceDeleted { uuid: device.uuid });
                orphaned += 1;
            }
        }

        let hijacked = if force {
            let deleted = self.store.delete_hijacked().await?;
            if deleted > 0 {
                // Bulk delete: individual keys are unknown here, flush the
                // affected kinds instead.
                self.cache.flush().await;
                self.user_devices.flush().await;
            }
            deleted
        } else {
            0
        };

        Ok(CleanupReport { orphaned, hijacked })
    }

    /// Persist an updated row, then evict the old cache entries and cache
    /// the fresh one. Publishes the generic updated event; callers add
    /// their specific one on top.
    async fn save(&self, before: &Device, mut updated: Device) -> AppResult<Device> {
        updated.updated_at = Utc::now();
        let saved = self.store.update(&updated).await?;
        self.evict(before).await;
        self.cache.put(&saved).await;
        if let Some(fp) = &saved.fingerprint {
            self.cache.put_key(&self.cache.key(fp), &saved).await;
        }
        self.events.publish(DomainEvent::DeviceUpdated {
            device: saved.clone(),
        });
        Ok(saved)
    }

    async fn evict(&self, device: &Device) {
        self.cache
            .forget_key(&self.cache.key(&device.uuid.to_string()))
            .await;
        if let Some(fp) = &device.fingerprint {
            self.cache.forget_key(&self.cache.key(fp)).await;
        }
        match self.store.users_for_device(device.uuid).await {
            Ok(users) => {
                for user in users {
                    self.user_devices
                        .forget_key(&self.user_devices.key(&user.to_string()))
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    device = %device.uuid,
                    "Could not enumerate users for cache eviction: {}", e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use crate::cache::{DEVICE_PREFIX, SESSION_PREFIX, USER_DEVICES_PREFIX};
    use crate::models::{Location, Session};
    use crate::services::location::PassthroughResolver;
    use crate::services::two_factor::TwoFactorService;
    use crate::storage::memory::{
        MemoryDeviceStore, MemorySessionStore, MemoryTwoFactorStore,
    };
    use crate::storage::SessionStore;

    const LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

    /// Delegating wrapper that counts `by_uuid` calls and can force the
    /// first N of them to miss — enough to drive both the cache-coherence
    /// and the insert-race scenarios.
    struct ProbedStore {
        inner: MemoryDeviceStore,
        by_uuid_calls: AtomicUsize,
        forced_misses: AtomicUsize,
    }

    impl ProbedStore {
        fn new(forced_misses: usize) -> Self {
            Self {
                inner: MemoryDeviceStore::new(),
                by_uuid_calls: AtomicUsize::new(0),
                forced_misses: AtomicUsize::new(forced_misses),
            }
        }
    }

    #[async_trait]
    impl DeviceStore for ProbedStore {
        async fn insert(&self, device: &Device) -> AppResult<Device> {
            self.inner.insert(device).await
        }

        async fn update(&self, device: &Device) -> AppResult<Device> {
            self.inner.update(device).await
        }

        async fn delete(&self, uuid: DeviceId) -> AppResult<bool> {
            self.inner.delete(uuid).await
        }

        async fn by_uuid(&self, uuid: DeviceId) -> AppResult<Option<Device>> {
            self.by_uuid_calls.fetch_add(1, Ordering::SeqCst);
            let forced = self.forced_misses.load(Ordering::SeqCst);
            if forced > 0 {
                self.forced_misses.store(forced - 1, Ordering::SeqCst);
                return Ok(None);
            }
            self.inner.by_uuid(uuid).await
        }

        async fn by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Device>> {
            self.inner.by_fingerprint(fingerprint).await
        }

        async fn devices_for_user(&self, user_id: Uuid) -> AppResult<Vec<Device>> {
            self.inner.devices_for_user(user_id).await
        }

        async fn users_for_device(&self, uuid: DeviceId) -> AppResult<Vec<Uuid>> {
            self.inner.users_for_device(uuid).await
        }

        async fn attach_user(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<DeviceUser> {
            self.inner.attach_user(uuid, user_id).await
        }

        async fn pivot(&self, uuid: DeviceId, user_id: Uuid) -> AppResult<Option<DeviceUser>> {
            self.inner.pivot(uuid, user_id).await
        }

        async fn set_pivot_status(
            &self,
            uuid: DeviceId,
            user_id: Uuid,
            status: DeviceStatus,
            verified_at: Option<DateTime<Utc>>,
        ) -> AppResult<()> {
            self.inner
                .set_pivot_status(uuid, user_id, status, verified_at)
                .await
        }

        async fn pivot_status_counts(&self) -> AppResult<Vec<StatusCount>> {
            self.inner.pivot_status_counts().await
        }

        async fn orphans(&self) -> AppResult<Vec<Device>> {
            self.inner.orphans().await
        }

        async fn delete_hijacked(&self) -> AppResult<u64> {
            self.inner.delete_hijacked().await
        }
    }

    fn cache(prefix: &'static str) -> EntityCache {
        EntityCache::new(
            Arc::new(MemoryCacheStore::new()),
            prefix,
            true,
            Duration::from_secs(60),
        )
    }

    fn registry_with(
        store: Arc<dyn DeviceStore>,
        session_store: Arc<MemorySessionStore>,
    ) -> DeviceRegistry {
        let events = EventBus::new(64);
        let sessions = Arc::new(SessionRegistry::new(
            session_store,
            Arc::new(TwoFactorService::new(Arc::new(MemoryTwoFactorStore::new()))),
            Arc::new(PassthroughResolver),
            cache(SESSION_PREFIX),
            events.clone(),
            LIFETIME,
        ));
        DeviceRegistry::new(
            store,
            sessions,
            cache(DEVICE_PREFIX),
            cache(USER_DEVICES_PREFIX),
            events,
        )
    }

    fn registry() -> (DeviceRegistry, Arc<MemorySessionStore>) {
        let sessions = Arc::new(MemorySessionStore::new());
        (
            registry_with(Arc::new(MemoryDeviceStore::new()), sessions.clone()),
            sessions,
        )
    }

    fn profile() -> DeviceProfile {
        DeviceProfile {
            browser: "Chrome".into(),
            browser_family: "Chrome".into(),
            browser_engine: "Blink".into(),
            platform: "Linux".into(),
            platform_family: "Linux".into(),
            device_type: "desktop".into(),
            device_family: "Generic".into(),
            device_model: "PC".into(),
            ..Default::default()
        }
    }

    async fn seed_session(
        store: &MemorySessionStore,
        device: DeviceId,
        user: Option<Uuid>,
        status: SessionStatus,
    ) -> Session {
        let session = Session::start(
            device,
            user,
            "10.0.0.1".into(),
            Location::from_ip("10.0.0.1"),
            status,
            None,
        );
        store.insert(&session).await.unwrap()
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (registry, _) = registry();
        let id = DeviceId::generate();

        let first = registry
            .register(id, profile(), "10.0.0.1", None)
            .await
            .unwrap();
        let second = registry
            .register(id, profile(), "10.9.9.9", None)
            .await
            .unwrap();

        assert_eq!(first.uuid, second.uuid);
        assert_eq!(first.created_at, second.created_at);
        // The second call did not overwrite anything.
        assert_eq!(second.ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn register_race_resolves_to_the_winner() {
        // The pre-insert existence check misses, the insert then collides
        // with the concurrent winner's row.
        let store = Arc::new(ProbedStore::new(1));
        let sessions = Arc::new(MemorySessionStore::new());
        let registry = registry_with(store.clone(), sessions);

        let id = DeviceId::generate();
        let winner = Device::new(id, profile(), "10.0.0.2".into(), None);
        store.inner.insert(&winner).await.unwrap();

        let resolved = registry
            .register(id, profile(), "10.0.0.1", None)
            .await
            .unwrap();
        assert_eq!(resolved.ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn register_with_taken_fingerprint_surfaces_the_conflict() {
        let (registry, _) = registry();
        let holder = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", Some("fp1".into()))
            .await
            .unwrap();

        let err = registry
            .register(DeviceId::generate(), profile(), "10.0.0.2", Some("fp1".into()))
            .await
            .unwrap_err();

        match err {
            AppError::FingerprintDuplicated { existing } => {
                assert_eq!(existing.uuid, holder.uuid)
            }
            other => panic!("expected duplicate fingerprint, got {other}"),
        }
    }

    #[tokio::test]
    async fn fingerprint_then_lookup_finds_the_same_device() {
        let (registry, _) = registry();
        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        assert!(!device.fingerprinted());

        let saved = registry.fingerprint(&device, "fp1").await.unwrap();
        assert!(saved.fingerprinted());

        let found = registry.by_fingerprint("fp1", true).await.unwrap().unwrap();
        assert_eq!(found.uuid, device.uuid);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_carries_the_existing_device() {
        let (registry, _) = registry();
        let holder = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", Some("fp1".into()))
            .await
            .unwrap();
        let other = registry
            .register(DeviceId::generate(), profile(), "10.0.0.2", None)
            .await
            .unwrap();

        let err = registry.fingerprint(&other, "fp1").await.unwrap_err();
        match err {
            AppError::FingerprintDuplicated { existing } => {
                assert_eq!(existing.uuid, holder.uuid)
            }
            other => panic!("expected duplicate fingerprint, got {other}"),
        }
    }

    #[tokio::test]
    async fn verify_unlocks_only_that_users_unexpired_sessions() {
        let (registry, sessions) = registry();
        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        let (user1, user2) = (Uuid::new_v4(), Uuid::new_v4());
        registry.attach_user(&device, user1).await.unwrap();
        registry.attach_user(&device, user2).await.unwrap();

        let fresh = seed_session(&sessions, device.uuid, Some(user1), SessionStatus::Locked).await;
        let mut stale =
            seed_session(&sessions, device.uuid, Some(user1), SessionStatus::Locked).await;
        stale.last_activity_at = Utc::now() - chrono::Duration::hours(5);
        sessions.update(&stale).await.unwrap();
        let other = seed_session(&sessions, device.uuid, Some(user2), SessionStatus::Locked).await;

        registry.verify(&device, user1).await.unwrap();

        assert_eq!(
            sessions.by_uuid(fresh.uuid).await.unwrap().unwrap().status,
            SessionStatus::Active
        );
        assert_eq!(
            sessions.by_uuid(stale.uuid).await.unwrap().unwrap().status,
            SessionStatus::Locked
        );
        assert_eq!(
            sessions.by_uuid(other.uuid).await.unwrap().unwrap().status,
            SessionStatus::Locked
        );

        let pivot1 = registry.pivot(&device, user1).await.unwrap().unwrap();
        assert_eq!(pivot1.status, DeviceStatus::Verified);
        assert!(pivot1.verified_at.is_some());
        let pivot2 = registry.pivot(&device, user2).await.unwrap().unwrap();
        assert_eq!(pivot2.status, DeviceStatus::Unverified);
    }

    #[tokio::test]
    async fn hijack_blocks_every_session_on_the_device() {
        let (registry, sessions) = registry();
        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        let (actor, bystander) = (Uuid::new_v4(), Uuid::new_v4());
        registry.attach_user(&device, actor).await.unwrap();
        registry.attach_user(&device, bystander).await.unwrap();

        let s1 = seed_session(&sessions, device.uuid, Some(actor), SessionStatus::Active).await;
        let s2 = seed_session(&sessions, device.uuid, Some(bystander), SessionStatus::Locked).await;

        let saved = registry.hijack(&device, actor).await.unwrap();
        assert_eq!(saved.status, DeviceStatus::Hijacked);
        assert!(saved.hijacked_at.is_some());

        for uuid in [s1.uuid, s2.uuid] {
            let session = sessions.by_uuid(uuid).await.unwrap().unwrap();
            assert_eq!(session.status, SessionStatus::Blocked);
            assert_eq!(session.blocked_by, Some(actor));
        }

        // The pivot flips only for the acting pair.
        let actor_pivot = registry.pivot(&device, actor).await.unwrap().unwrap();
        assert_eq!(actor_pivot.status, DeviceStatus::Hijacked);
        let bystander_pivot = registry.pivot(&device, bystander).await.unwrap().unwrap();
        assert_eq!(bystander_pivot.status, DeviceStatus::Unverified);
    }

    #[tokio::test]
    async fn forget_finishes_sessions_and_leaves_no_stale_cache() {
        let (registry, sessions) = registry();
        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", Some("fp1".into()))
            .await
            .unwrap();
        let user = Uuid::new_v4();
        registry.attach_user(&device, user).await.unwrap();
        let open = seed_session(&sessions, device.uuid, Some(user), SessionStatus::Active).await;

        // Warm both lookup paths.
        registry.by_uuid(device.uuid, true).await.unwrap();
        registry.by_fingerprint("fp1", true).await.unwrap();

        assert!(registry.forget(&device).await.unwrap());

        assert!(registry.by_uuid(device.uuid, true).await.unwrap().is_none());
        assert!(registry.by_fingerprint("fp1", true).await.unwrap().is_none());

        // Session history survives, marked finished.
        let ended = sessions.by_uuid(open.uuid).await.unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Finished);
        assert!(ended.finished_at.is_some());

        // Re-registering the same uuid repopulates a fresh entry.
        let fresh = registry
            .register(device.uuid, profile(), "10.0.0.9", None)
            .await
            .unwrap();
        let cached = registry.by_uuid(device.uuid, true).await.unwrap().unwrap();
        assert_eq!(cached.ip, fresh.ip);
    }

    #[tokio::test]
    async fn by_status_shifts_on_verify() {
        let (registry, _) = registry();
        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        let (user1, user2) = (Uuid::new_v4(), Uuid::new_v4());
        registry.attach_user(&device, user1).await.unwrap();
        registry.attach_user(&device, user2).await.unwrap();

        let count_of = |counts: &[StatusCount], status: DeviceStatus| {
            counts
                .iter()
                .find(|c| c.status == status)
                .map(|c| c.total)
                .unwrap_or(0)
        };

        let before = registry.by_status().await.unwrap();
        assert_eq!(count_of(&before, DeviceStatus::Unverified), 2);
        assert_eq!(count_of(&before, DeviceStatus::Verified), 0);

        registry.verify(&device, user1).await.unwrap();

        let after = registry.by_status().await.unwrap();
        assert_eq!(count_of(&after, DeviceStatus::Unverified), 1);
        assert_eq!(count_of(&after, DeviceStatus::Verified), 1);
    }

    #[tokio::test]
    async fn cleanup_spares_hijacked_devices_unless_forced() {
        let (registry, sessions) = registry();

        let orphan = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();

        let hijacked = registry
            .register(DeviceId::generate(), profile(), "10.0.0.2", None)
            .await
            .unwrap();
        let user = Uuid::new_v4();
        registry.attach_user(&hijacked, user).await.unwrap();
        let hijacked = registry.hijack(&hijacked, user).await.unwrap();

        // No users, but session history: not an orphan.
        let remembered = registry
            .register(DeviceId::generate(), profile(), "10.0.0.3", None)
            .await
            .unwrap();
        seed_session(&sessions, remembered.uuid, None, SessionStatus::Finished).await;

        let report = registry.cleanup(false).await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.hijacked, 0);
        assert!(registry.by_uuid(orphan.uuid, false).await.unwrap().is_none());
        assert!(registry
            .by_uuid(hijacked.uuid, false)
            .await
            .unwrap()
            .is_some());
        assert!(registry
            .by_uuid(remembered.uuid, false)
            .await
            .unwrap()
            .is_some());

        let forced = registry.cleanup(true).await.unwrap();
        assert_eq!(forced.hijacked, 1);
        assert!(registry
            .by_uuid(hijacked.uuid, false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cached_lookup_hits_the_store_once() {
        let store = Arc::new(ProbedStore::new(0));
        let sessions = Arc::new(MemorySessionStore::new());
        let registry = registry_with(store.clone(), sessions);

        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        // Registration primes the cache, so neither lookup below reaches
        // the store.
        let baseline = store.by_uuid_calls.load(Ordering::SeqCst);

        registry.by_uuid(device.uuid, true).await.unwrap();
        registry.by_uuid(device.uuid, true).await.unwrap();

        assert_eq!(store.by_uuid_calls.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let (registry, _) = registry();
        let mut rx = registry.events.subscribe();

        let device = registry
            .register(DeviceId::generate(), profile(), "10.0.0.1", None)
            .await
            .unwrap();
        let device = registry.fingerprint(&device, "fp1").await.unwrap();
        let user = Uuid::new_v4();
        registry.attach_user(&device, user).await.unwrap();
        let device = registry.verify(&device, user).await.unwrap();
        registry.forget(&device).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.name());
        }
        for expected in [
            "device.created",
            "device.fingerprinted",
            "device.verified",
            "device.deleted",
        ] {
            assert!(seen.contains(&expected), "missing {expected}: {seen:?}");
        }
    }
}
