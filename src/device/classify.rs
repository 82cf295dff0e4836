//! Lexical user-agent classification.
//!
//! Every table below is evaluated top to bottom and the first matching row
//! wins, so more specific markers must sit above generic ones.

use serde::Serialize;

use crate::model::device::{Browser, DeviceClass, Platform};

pub const UNKNOWN: &str = "Unknown";
const UNKNOWN_DEVICE: &str = "Unknown Device";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAttributes {
    pub device_name: String,
    pub device_type: DeviceClass,
    pub platform: Platform,
    pub os_version: String,
    pub browser: Browser,
    pub browser_version: String,
}

impl DeviceAttributes {
    fn unknown() -> Self {
        Self {
            device_name: UNKNOWN_DEVICE.into(),
            device_type: DeviceClass::Desktop,
            platform: Platform::Unknown,
            os_version: UNKNOWN.into(),
            browser: Browser::Unknown,
            browser_version: UNKNOWN.into(),
        }
    }

    pub fn os_version(&self) -> Option<&str> {
        known(&self.os_version)
    }

    pub fn browser_version(&self) -> Option<&str> {
        known(&self.browser_version)
    }
}

fn known(value: &str) -> Option<&str> {
    (value != UNKNOWN).then_some(value)
}

struct PlatformRule {
    any_of: &'static [&'static str],
    platform: Platform,
    os_version: &'static str,
}

const fn platform(
    any_of: &'static [&'static str],
    platform: Platform,
    os_version: &'static str,
) -> PlatformRule {
    PlatformRule {
        any_of,
        platform,
        os_version,
    }
}

// Android and iOS user-agents embed "Linux" and "like Mac OS X", so the
// mobile platforms are matched before macOS and Linux.
const PLATFORM_RULES: &[PlatformRule] = &[
    platform(&["windows nt 10"], Platform::Windows, "10/11"),
    platform(&["windows nt 6.3"], Platform::Windows, "8.1"),
    platform(&["windows nt 6.2"], Platform::Windows, "8"),
    platform(&["windows nt 6.1"], Platform::Windows, "7"),
    platform(&["windows"], Platform::Windows, UNKNOWN),
    platform(&["android 13"], Platform::Android, "13"),
    platform(&["android 12"], Platform::Android, "12"),
    platform(&["android 11"], Platform::Android, "11"),
    platform(&["android 10"], Platform::Android, "10"),
    platform(&["android"], Platform::Android, UNKNOWN),
    platform(&["iphone os 17_"], Platform::Ios, "17"),
    platform(&["iphone os 16_"], Platform::Ios, "16"),
    platform(&["iphone os 15_"], Platform::Ios, "15"),
    platform(&["iphone", "ipad"], Platform::Ios, UNKNOWN),
    platform(&["mac os x 10_15", "mac os x 10.15"], Platform::MacOs, "Catalina"),
    platform(&["mac os x 11_", "mac os x 11."], Platform::MacOs, "Big Sur"),
    platform(&["mac os x 12_", "mac os x 12."], Platform::MacOs, "Monterey"),
    platform(&["mac os x 13_", "mac os x 13."], Platform::MacOs, "Ventura"),
    platform(&["mac os x 14_", "mac os x 14."], Platform::MacOs, "Sonoma"),
    platform(&["macintosh", "mac os"], Platform::MacOs, UNKNOWN),
    platform(&["ubuntu"], Platform::Ubuntu, UNKNOWN),
    platform(&["linux"], Platform::Linux, UNKNOWN),
];

// iPad user-agents also carry a "Mobile/" token, hence tablets first.
const CLASS_RULES: &[(&[&str], DeviceClass)] = &[
    (&["ipad", "tablet"], DeviceClass::Tablet),
    (&["mobile", "android", "iphone"], DeviceClass::Mobile),
    (
        &[
            "smart-tv", "smarttv", "smart tv", "googletv", "appletv", "hbbtv", "tv safari",
            " tv ", "(tv;",
        ],
        DeviceClass::Tv,
    ),
];

struct BrowserRule {
    any_of: &'static [&'static str],
    none_of: &'static [&'static str],
    browser: Browser,
    /// Case-sensitive token the version follows, if any.
    version_after: Option<&'static str>,
}

// Edge carries a Chrome token and Chrome carries a Safari token.
const BROWSER_RULES: &[BrowserRule] = &[
    BrowserRule {
        any_of: &["edg/"],
        none_of: &[],
        browser: Browser::Edge,
        version_after: Some("Edg/"),
    },
    BrowserRule {
        any_of: &["chrome/"],
        none_of: &["edg"],
        browser: Browser::Chrome,
        version_after: Some("Chrome/"),
    },
    BrowserRule {
        any_of: &["firefox/"],
        none_of: &[],
        browser: Browser::Firefox,
        version_after: Some("Firefox/"),
    },
    BrowserRule {
        any_of: &["safari/"],
        none_of: &["chrome"],
        browser: Browser::Safari,
        version_after: Some("Version/"),
    },
    BrowserRule {
        any_of: &["opera"],
        none_of: &[],
        browser: Browser::Opera,
        version_after: None,
    },
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn detect_platform(lower: &str) -> (Platform, &'static str) {
    PLATFORM_RULES
        .iter()
        .find(|rule| contains_any(lower, rule.any_of))
        .map(|rule| (rule.platform, rule.os_version))
        .unwrap_or((Platform::Unknown, UNKNOWN))
}

fn detect_class(lower: &str) -> DeviceClass {
    CLASS_RULES
        .iter()
        .find(|(markers, _)| contains_any(lower, markers))
        .map(|(_, class)| *class)
        .unwrap_or(DeviceClass::Desktop)
}

fn detect_browser(raw: &str, lower: &str) -> (Browser, String) {
    let Some(rule) = BROWSER_RULES
        .iter()
        .find(|rule| contains_any(lower, rule.any_of) && !contains_any(lower, rule.none_of))
    else {
        return (Browser::Unknown, UNKNOWN.into());
    };

    let version = rule
        .version_after
        .and_then(|marker| version_after(raw, marker))
        .unwrap_or(UNKNOWN)
        .to_string();
    (rule.browser, version)
}

fn version_after<'a>(raw: &'a str, marker: &str) -> Option<&'a str> {
    raw.split_once(marker)
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .filter(|v| !v.is_empty())
}

fn compose_name(
    platform: Platform,
    os_version: &str,
    class: DeviceClass,
    browser: Browser,
    browser_version: &str,
) -> String {
    let mut name = platform.to_string();
    if let Some(os) = known(os_version) {
        name.push(' ');
        name.push_str(os);
    }

    if browser != Browser::Unknown {
        name.push_str(" - ");
        name.push_str(browser.as_str());
        if let Some(version) = known(browser_version) {
            let major = version.split('.').next().unwrap_or(version);
            name.push(' ');
            name.push_str(major);
        }
    }

    match class {
        DeviceClass::Mobile => format!("Mobile {name}"),
        DeviceClass::Tablet => format!("Tablet {name}"),
        DeviceClass::Tv => format!("Smart TV {name}"),
        DeviceClass::Desktop => name,
    }
}

/// Classifies a raw user-agent. Never fails: absent or empty input yields
/// the "Unknown Device" desktop sentinel.
pub fn classify_user_agent(user_agent: Option<&str>) -> DeviceAttributes {
    let raw = match user_agent.map(str::trim) {
        Some(ua) if !ua.is_empty() && !ua.eq_ignore_ascii_case("unknown") => ua,
        _ => return DeviceAttributes::unknown(),
    };
    let lower = raw.to_lowercase();

    let (platform, os_version) = detect_platform(&lower);
    let device_type = detect_class(&lower);
    let (browser, browser_version) = detect_browser(raw, &lower);
    let device_name = compose_name(platform, os_version, device_type, browser, &browser_version);

    DeviceAttributes {
        device_name,
        device_type,
        platform,
        os_version: os_version.to_string(),
        browser,
        browser_version,
    }
}

/// Per-user dedup key. Only the platform, browser family and client IP take
/// part, so browser or OS upgrades keep the same signature.
pub fn derive_signature(attributes: &DeviceAttributes, client_ip: &str) -> String {
    format!("{}-{}-{}", attributes.platform, attributes.browser, client_ip)
}
