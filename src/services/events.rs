use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Device, Session};
use crate::transport::DeviceId;

/// Domain events fired on device/session lifecycle changes. External
/// subscribers (alerting, audit, notification channels) consume these;
/// emission never blocks on delivery.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    DeviceCreated { device: Device },
    DeviceUpdated { device: Device },
    DeviceDeleted { uuid: DeviceId },
    DeviceFingerprinted { device: Device },
    DeviceVerified { uuid: DeviceId, user_id: Uuid },
    DeviceHijacked { uuid: DeviceId, user_id: Uuid },
    DeviceTracked { uuid: DeviceId },
    SessionStarted { session: Session },
    SessionLocked { uuid: Uuid },
    SessionUnlocked { uuid: Uuid },
    SessionBlocked { uuid: Uuid, blocked_by: Uuid },
    SessionFinished { uuid: Uuid },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::DeviceCreated { .. } => "device.created",
            DomainEvent::DeviceUpdated { .. } => "device.updated",
            DomainEvent::DeviceDeleted { .. } => "device.deleted",
            DomainEvent::DeviceFingerprinted { .. } => "device.fingerprinted",
            DomainEvent::DeviceVerified { .. } => "device.verified",
            DomainEvent::DeviceHijacked { .. } => "device.hijacked",
            DomainEvent::DeviceTracked { .. } => "device.tracked",
            DomainEvent::SessionStarted { .. } => "session.started",
            DomainEvent::SessionLocked { .. } => "session.locked",
            DomainEvent::SessionUnlocked { .. } => "session.unlocked",
            DomainEvent::SessionBlocked { .. } => "session.blocked",
            DomainEvent::SessionFinished { .. } => "session.finished",
        }
    }
}

/// Broadcast-backed event queue. Publishing with no subscribers is fine;
/// slow subscribers lag and drop rather than backpressure the request path.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(subscribers) => {
                tracing::debug!(event = name, subscribers, "published domain event");
            }
            Err(_) => {
                tracing::trace!(event = name, "no subscribers for domain event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
