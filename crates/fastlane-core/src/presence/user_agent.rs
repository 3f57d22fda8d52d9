//! 根据 User-Agent 推断设备类型

pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// 有序匹配表，第一个命中的条目生效
const DEVICE_TABLE: &[(&[&str], &str)] = &[
    (&["iPhone"], "iPhone"),
    (&["iPad"], "iPad"),
    (&["Android", "Mobile"], "Android Phone"),
    (&["Android"], "Android Tablet"),
    (&["Mac OS X"], "Mac"),
    (&["Windows"], "Windows PC"),
    (&["Linux"], "Linux PC"),
    (&["Chrome"], "Chrome Browser"),
    (&["Firefox"], "Firefox Browser"),
    (&["Safari"], "Safari Browser"),
];

/// 设备显示名称
pub fn classify(user_agent: &str) -> &'static str {
    DEVICE_TABLE
        .iter()
        .find(|(needles, _)| needles.iter().all(|n| user_agent.contains(*n)))
        .map_or(UNKNOWN_DEVICE, |&(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_platforms() {
        assert_eq!(
            classify("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)"),
            "iPhone"
        );
        assert_eq!(
            classify("Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)"),
            "iPad"
        );
        assert_eq!(
            classify("Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36"),
            "Android Phone"
        );
        assert_eq!(
            classify("Mozilla/5.0 (Linux; Android 13; SM-X700) Safari/537.36"),
            "Android Tablet"
        );
    }

    #[test]
    fn test_desktop_platforms() {
        assert_eq!(
            classify("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Safari/605.1.15"),
            "Mac"
        );
        assert_eq!(
            classify("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0"),
            "Windows PC"
        );
        assert_eq!(classify("Mozilla/5.0 (X11; Linux x86_64)"), "Linux PC");
    }

    #[test]
    fn test_browser_fallbacks() {
        assert_eq!(classify("Chrome/120.0 Headless"), "Chrome Browser");
        assert_eq!(classify("Firefox/121.0"), "Firefox Browser");
        assert_eq!(classify("curl/8.4.0"), UNKNOWN_DEVICE);
        assert_eq!(classify(""), UNKNOWN_DEVICE);
    }
}
