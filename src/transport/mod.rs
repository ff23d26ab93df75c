use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::{header, HeaderValue, Request, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::DevicesConfig;
use crate::error::AppResult;

pub mod device_id;

pub use device_id::DeviceId;

/// Carrier mechanisms a device id can travel through. Which ones are
/// consulted, and in what order, is configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Cookie,
    Header,
    Session,
}

impl Carrier {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cookie" => Some(Self::Cookie),
            "header" => Some(Self::Header),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// Request-scoped session store carrier. An outer session layer populates
/// it; we read and write the device id key like any other carrier.
#[derive(Debug, Clone, Default)]
pub struct ClientSession(Arc<Mutex<HashMap<String, String>>>);

impl ClientSession {
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.lock().expect("session map poisoned").get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &str) {
        self.0
            .lock()
            .expect("session map poisoned")
            .insert(key.to_string(), value.to_string());
    }
}

/// Moves the device id between client and server across the configured
/// carriers: resolve on the way in, attach on the way out, propagate into
/// the request so downstream consumers read it uniformly.
#[derive(Debug, Clone)]
pub struct Transport {
    config: DevicesConfig,
    precedence: Vec<Carrier>,
    current: Option<Carrier>,
}

impl Transport {
    pub fn new(config: DevicesConfig) -> Self {
        let precedence: Vec<Carrier> = config
            .precedence
            .iter()
            .filter_map(|name| {
                let carrier = Carrier::from_name(name);
                if carrier.is_none() {
                    tracing::warn!("Unknown device id carrier in precedence: {}", name);
                }
                carrier
            })
            .collect();

        let current = Carrier::from_name(&config.transport);
        if current.is_none() {
            tracing::warn!(
                "Unknown device id transport {:?}; responses will not carry the id",
                config.transport
            );
        }

        Self {
            config,
            precedence,
            current,
        }
    }

    /// Resolve the device id from an incoming request. Carriers are tried
    /// in the configured precedence order; the first one holding a value
    /// decides the outcome — a malformed value there is an error, never
    /// silently skipped. The request parameter is the final fallback.
    pub fn resolve<B>(&self, request: &Request<B>) -> AppResult<Option<DeviceId>> {
        for carrier in &self.precedence {
            if let Some(raw) = self.read(*carrier, request) {
                return raw.parse().map(Some);
            }
        }

        match self.read_request_param(request) {
            Some(raw) => raw.parse().map(Some),
            None => Ok(None),
        }
    }

    /// Write the id back through the single currently configured carrier.
    pub fn attach<B>(
        &self,
        response: &mut Response<B>,
        id: DeviceId,
        session: Option<&ClientSession>,
    ) -> AppResult<()> {
        match self.current {
            Some(Carrier::Cookie) => {
                let cookie = self.build_cookie(&self.config.cookie_name, &id.to_string());
                append_set_cookie(response, &cookie)?;
            }
            Some(Carrier::Header) => {
                let value = HeaderValue::from_str(&id.to_string())
                    .map_err(|e| anyhow::anyhow!("Device id header value: {}", e))?;
                let name: header::HeaderName = self
                    .config
                    .header_name
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Device id header name: {}", e))?;
                response.headers_mut().insert(name, value);
            }
            Some(Carrier::Session) => {
                if let Some(session) = session {
                    session.put(&self.config.session_key, &id.to_string());
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Inject the id into the request's extension namespace so downstream
    /// consumers read it uniformly regardless of carrier. Merges: nothing
    /// else in the request is touched.
    pub fn propagate<B>(&self, request: &mut Request<B>, id: DeviceId) {
        request.extensions_mut().insert(id);
    }

    /// Mirror the fingerprint into its cookie; the handler calls this only
    /// when the cookie is not already present on the request.
    pub fn attach_fingerprint_cookie<B>(
        &self,
        response: &mut Response<B>,
        fingerprint: &str,
    ) -> AppResult<()> {
        let cookie = self.build_cookie(&self.config.fingerprint_cookie_name, fingerprint);
        append_set_cookie(response, &cookie)
    }

    pub fn fingerprint_cookie_value<B>(&self, request: &Request<B>) -> Option<String> {
        CookieJar::from_headers(request.headers())
            .get(&self.config.fingerprint_cookie_name)
            .map(|c| c.value().to_string())
    }

    fn read<B>(&self, carrier: Carrier, request: &Request<B>) -> Option<String> {
        match carrier {
            Carrier::Cookie => CookieJar::from_headers(request.headers())
                .get(&self.config.cookie_name)
                .map(|c| c.value().to_string()),
            Carrier::Header => request
                .headers()
                .get(&self.config.header_name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Carrier::Session => request
                .extensions()
                .get::<ClientSession>()
                .and_then(|s| s.get(&self.config.session_key)),
        }
    }

    fn read_request_param<B>(&self, request: &Request<B>) -> Option<String> {
        let query = request.uri().query()?;
        let params: HashMap<String, String> = serde_urlencoded::from_str(query).ok()?;
        params.get(&self.config.request_param).cloned()
    }

    fn build_cookie(&self, name: &str, value: &str) -> Cookie<'static> {
        let mut cookie = Cookie::new(name.to_string(), value.to_string());
        cookie.set_path("/");
        cookie.set_secure(self.config.secure_cookie);
        cookie.set_http_only(self.config.http_only_cookie);
        cookie.make_permanent();
        cookie
    }
}

fn append_set_cookie<B>(response: &mut Response<B>, cookie: &Cookie<'_>) -> AppResult<()> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| anyhow::anyhow!("Set-Cookie value: {}", e))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(())
}
