//! User agent classification for engagement events.

use serde::Serialize;

/// Device, browser and OS guessed from a `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAgentInfo {
    /// `desktop`, `mobile` or `tablet`
    pub device_type: &'static str,
    pub browser: Option<&'static str>,
    pub os: Option<&'static str>,
}

impl Default for UserAgentInfo {
    fn default() -> Self {
        Self {
            device_type: "desktop",
            browser: None,
            os: None,
        }
    }
}

/// Classify a user agent string. Unknown agents are desktop with no browser
/// or OS.
pub fn parse(user_agent: &str) -> UserAgentInfo {
    let ua = user_agent.to_ascii_lowercase();
    if ua.trim().is_empty() {
        return UserAgentInfo::default();
    }

    UserAgentInfo {
        device_type: device_type(&ua),
        browser: browser(&ua),
        os: os(&ua),
    }
}

fn device_type(ua: &str) -> &'static str {
    if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        "tablet"
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") {
        "mobile"
    } else {
        "desktop"
    }
}

// Order matters: most Chromium forks also claim Chrome and Safari.
fn browser(ua: &str) -> Option<&'static str> {
    const RULES: &[(&str, &str)] = &[
        ("googleimageproxy", "Gmail Image Proxy"),
        ("edg/", "Edge"),
        ("edga/", "Edge"),
        ("edgios/", "Edge"),
        ("opr/", "Opera"),
        ("samsungbrowser", "Samsung Internet"),
        ("thunderbird", "Thunderbird"),
        ("firefox/", "Firefox"),
        ("fxios/", "Firefox"),
        ("crios/", "Chrome"),
        ("chrome/", "Chrome"),
        ("safari/", "Safari"),
    ];
    RULES
        .iter()
        .find(|(needle, _)| ua.contains(needle))
        .map(|(_, name)| *name)
}

fn os(ua: &str) -> Option<&'static str> {
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        Some("iOS")
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        Some("Mac OS")
    } else if ua.contains("android") {
        Some("Android")
    } else if ua.contains("windows") {
        Some("Windows")
    } else if ua.contains("cros ") {
        Some("Chrome OS")
    } else if ua.contains("linux") {
        Some("Linux")
    } else {
        None
    }
}
