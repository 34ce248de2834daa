//! `marasi.utils` (spec.md §4.8) — id generation, clock, sleep, and shorthand
//! constructors for the Cookie/Url facades.

use std::time::Duration;

use uuid::Uuid;

use crate::bridge::cookie::Cookie;
use crate::bridge::url::Url;

pub fn uuid() -> String {
    Uuid::now_v7().to_string()
}

pub fn timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Blocks the calling extension's runtime for up to `cap_ms` (default 5000,
/// spec.md §4.8) to bound how long a malicious or buggy script can stall the
/// pipeline.
pub fn sleep(ms: i64, cap_ms: Option<i64>) {
    let cap = cap_ms.unwrap_or(5000).max(0);
    let clamped = ms.clamp(0, cap);
    std::thread::sleep(Duration::from_millis(clamped as u64));
}

pub fn cookie(name: &str, value: &str) -> Cookie {
    Cookie::new(name, value)
}

pub fn url(raw: &str) -> Url {
    Url::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_is_time_ordered() {
        let a = uuid();
        let b = uuid();
        assert!(b >= a);
    }

    #[test]
    fn sleep_is_clamped_to_cap() {
        let start = std::time::Instant::now();
        sleep(10_000, Some(5));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn cookie_and_url_shorthands_build_facades() {
        let c = cookie("session", "abc");
        assert_eq!(c.name, "session");
        let mut u = url("https://example.com/path?q=1");
        assert_eq!(u.host(), "example.com");
    }
}
