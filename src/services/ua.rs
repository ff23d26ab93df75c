use crate::models::DeviceProfile;

/// Contract for turning a raw User-Agent into the descriptive fields a new
/// device record is populated from. Real deployments can plug in a full
/// parser; the registry only depends on this trait.
pub trait UaProfiler: Send + Sync {
    fn profile(&self, user_agent: &str) -> DeviceProfile;
}

/// Baseline token matcher. Recognizes the major engines and platforms and
/// leaves the rest empty rather than guessing.
#[derive(Debug, Default)]
pub struct TokenProfiler;

impl TokenProfiler {
    fn version_after(user_agent: &str, token: &str) -> String {
        user_agent
            .split_once(token)
            .map(|(_, rest)| {
                rest.chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl UaProfiler for TokenProfiler {
    fn profile(&self, user_agent: &str) -> DeviceProfile {
        let ua = user_agent;

        let (browser, browser_version, browser_engine) = if ua.contains("Edg/") {
            ("Edge", Self::version_after(ua, "Edg/"), "Blink")
        } else if ua.contains("OPR/") {
            ("Opera", Self::version_after(ua, "OPR/"), "Blink")
        } else if ua.contains("Chrome/") {
            ("Chrome", Self::version_after(ua, "Chrome/"), "Blink")
        } else if ua.contains("Firefox/") {
            ("Firefox", Self::version_after(ua, "Firefox/"), "Gecko")
        } else if ua.contains("Safari/") {
            ("Safari", Self::version_after(ua, "Version/"), "WebKit")
        } else {
            ("", String::new(), "")
        };

        let (platform, platform_version, platform_family) = if ua.contains("Windows NT") {
            ("Windows", Self::version_after(ua, "Windows NT "), "Windows")
        } else if ua.contains("Android") {
            ("Android", Self::version_after(ua, "Android "), "Android")
        } else if ua.contains("iPhone OS") || ua.contains("iPad; CPU OS") {
            ("iOS", String::new(), "iOS")
        } else if ua.contains("Mac OS X") {
            ("macOS", String::new(), "macOS")
        } else if ua.contains("Linux") {
            ("Linux", String::new(), "Linux")
        } else {
            ("", String::new(), "")
        };

        let (device_type, device_family, device_model) = if ua.contains("iPhone") {
            ("mobile", "Apple", "iPhone")
        } else if ua.contains("iPad") {
            ("tablet", "Apple", "iPad")
        } else if ua.contains("Android") && ua.contains("Mobile") {
            ("mobile", "Generic", "Smartphone")
        } else if ua.contains("Android") {
            ("tablet", "Generic", "Tablet")
        } else if ua.to_ascii_lowercase().contains("bot") {
            ("bot", "Generic", "Bot")
        } else {
            ("desktop", "Generic", "PC")
        };

        DeviceProfile {
            browser: browser.to_string(),
            browser_version,
            browser_family: browser.to_string(),
            browser_engine: browser_engine.to_string(),
            platform: platform.to_string(),
            platform_version,
            platform_family: platform_family.to_string(),
            device_type: device_type.to_string(),
            device_family: device_family.to_string(),
            device_model: device_model.to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}
