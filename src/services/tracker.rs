use std::sync::Arc;

use axum::http::{header, HeaderMap, Request, Response};

use crate::config::DevicesConfig;
use crate::error::{AppError, AppResult};
use crate::models::DeviceProfile;
use crate::services::devices::DeviceRegistry;
use crate::services::events::{DomainEvent, EventBus};
use crate::services::sessions::SessionRegistry;
use crate::services::ua::UaProfiler;
use crate::transport::{ClientSession, DeviceId, Transport};

/// Per-request tracking flow: resolve (or mint) the device id, make sure a
/// device record exists when tracking applies, and propagate the id into
/// the request. The middleware attaches the id to the response afterwards.
pub struct DeviceTracker {
    transport: Transport,
    devices: Arc<DeviceRegistry>,
    sessions: Arc<SessionRegistry>,
    profiler: Arc<dyn UaProfiler>,
    events: EventBus,
    config: DevicesConfig,
}

impl DeviceTracker {
    pub fn new(
        transport: Transport,
        devices: Arc<DeviceRegistry>,
        sessions: Arc<SessionRegistry>,
        profiler: Arc<dyn UaProfiler>,
        events: EventBus,
        config: DevicesConfig,
    ) -> Self {
        Self {
            transport,
            devices,
            sessions,
            profiler,
            events,
            config,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Resolve or create the device id for this request. Errors here are
    /// tracking failures; the caller decides fail-open behavior.
    pub async fn track<B>(&self, request: &mut Request<B>) -> AppResult<Option<DeviceId>> {
        let resolved = match self.transport.resolve(request) {
            Ok(resolved) => resolved,
            Err(AppError::MalformedDeviceId(value)) if self.config.regenerate_lost_devices => {
                tracing::warn!(value = %value, "Malformed device id; issuing a fresh one");
                None
            }
            Err(e) => return Err(e),
        };

        let id = match resolved {
            Some(id) => {
                match self.devices.by_uuid(id, true).await? {
                    Some(device) => {
                        if self.config.track_guest_sessions {
                            if let Some(current) =
                                self.sessions.current(device.uuid, None).await?
                            {
                                self.sessions.touch(&current).await?;
                            }
                        }
                    }
                    None if self.config.track_guest_sessions => {
                        // The client kept an id we no longer know; re-register
                        // it rather than breaking identity continuity.
                        let (profile, fingerprint, ip) = self.device_inputs(request);
                        let device =
                            self.devices.register(id, profile, &ip, fingerprint).await?;
                        self.sessions.start_guest(&device, &ip).await?;
                    }
                    None => return Err(AppError::UnknownDeviceDetected),
                }
                id
            }
            None => {
                let id = DeviceId::generate();
                if self.config.track_guest_sessions {
                    let (profile, fingerprint, ip) = self.device_inputs(request);
                    let device =
                        self.devices.register(id, profile, &ip, fingerprint).await?;
                    self.sessions.start_guest(&device, &ip).await?;
                }
                id
            }
        };

        self.transport.propagate(request, id);
        self.events.publish(DomainEvent::DeviceTracked { uuid: id });
        Ok(Some(id))
    }

    pub fn attach<B>(
        &self,
        response: &mut Response<B>,
        id: DeviceId,
        session: Option<&ClientSession>,
    ) -> AppResult<()> {
        self.transport.attach(response, id, session)
    }

    /// Extract the owned inputs a new device record needs from the request.
    /// Kept synchronous so the `&Request` borrow never spans an await point.
    fn device_inputs<B>(&self, request: &Request<B>) -> (DeviceProfile, Option<String>, String) {
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let profile = self.profiler.profile(user_agent);
        let fingerprint = if self.config.fingerprinting_enabled {
            self.transport.fingerprint_cookie_value(request)
        } else {
            None
        };
        let ip = client_ip(request.headers());
        (profile, fingerprint, ip)
    }
}

/// Best-effort client ip: forwarded headers first, since the service sits
/// behind a proxy in every deployment shape we run.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("X-Real-Ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
