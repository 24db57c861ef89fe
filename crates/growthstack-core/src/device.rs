use serde::{Deserialize, Serialize};

/// Browser/OS/device fields derived from a raw User-Agent string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub device_type: String,
}

impl DeviceInfo {
    /// Parse a `User-Agent` string via the `woothee` crate.
    ///
    /// Returns `None` if the UA string is empty or `woothee` cannot
    /// classify it, so unparseable agents stay unenriched.
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        if user_agent.is_empty() {
            return None;
        }

        let result = woothee::parser::Parser::new().parse(user_agent)?;

        // woothee `category` maps to our device_type convention:
        //   "pc"         → "desktop"
        //   "smartphone" → "mobile"
        //   "mobilephone"→ "mobile"
        //   "tablet"     → "tablet"
        //   everything else → "desktop" (conservative default)
        let device_type = match result.category {
            "smartphone" | "mobilephone" => "mobile",
            "tablet" => "tablet",
            _ => "desktop",
        }
        .to_string();

        // woothee returns empty string for unknown values; normalise to None.
        let browser_version = if result.version.is_empty() {
            None
        } else {
            Some(result.version.to_string())
        };

        let os_version = if result.os_version.is_empty() {
            None
        } else {
            Some(result.os_version.to_string())
        };

        Some(Self {
            browser: result.name.to_string(),
            browser_version,
            os: result.os.to_string(),
            os_version,
            device_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    #[test]
    fn parses_desktop_chrome() {
        let info = DeviceInfo::from_user_agent(CHROME_UA).expect("parseable UA");
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn smartphone_category_maps_to_mobile() {
        let info = DeviceInfo::from_user_agent(IPHONE_UA).expect("parseable UA");
        assert_eq!(info.device_type, "mobile");
    }

    #[test]
    fn empty_ua_yields_none() {
        assert!(DeviceInfo::from_user_agent("").is_none());
    }
}
