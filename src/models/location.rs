use serde::{Deserialize, Serialize};

use crate::cache::{self, Cacheable};

/// Resolved geo data for an ip. Immutable once resolved; cached under a key
/// derived from the ip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub timezone: Option<String>,
}

impl Location {
    pub fn from_ip(ip: &str) -> Self {
        Self {
            ip: Some(ip.to_string()),
            ..Default::default()
        }
    }

    pub fn label(&self) -> String {
        let parts: Vec<&str> = [&self.postal, &self.city, &self.region, &self.country]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();
        parts.join(", ")
    }
}

impl Cacheable for Location {
    fn cache_key(&self) -> String {
        cache::key(cache::LOCATION_PREFIX, self.ip.as_deref().unwrap_or(""))
    }
}
