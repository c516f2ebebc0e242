use reqwest::Url;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const SCREENSHOT_ROUTE: &str = "/screenshots";
pub const OUTPUT_ROUTE: &str = "/output";

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Resolves an href against the page it was found on, the way a browser
/// computes `anchor.href`.
pub fn resolve_href(base_url: &str, href: &str) -> Option<String> {
    match Url::parse(base_url) {
        Ok(base) => base.join(href).ok().map(|u| u.to_string()),
        Err(_) => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

pub fn is_network_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn get_unix_timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Time-derived session id, kept unique under concurrent creation by a
/// process-wide counter.
pub fn new_session_id() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", get_unix_timestamp().as_millis(), n)
}

pub fn homepage_screenshot_name(session_id: &str) -> String {
    format!("{}-01-homepage.png", session_id)
}

pub fn image_screenshot_name(session_id: &str, position: usize) -> String {
    format!("{}-02-image-{}.png", session_id, position)
}

pub fn contact_screenshot_name(session_id: &str) -> String {
    format!("{}-03-contact.png", session_id)
}

pub fn data_file_name(session_id: &str) -> String {
    format!("{}-data.json", session_id)
}

pub fn report_file_name(session_id: &str) -> String {
    format!("{}-report.txt", session_id)
}

pub fn html_file_name(session_id: &str) -> String {
    format!("{}-homepage.html", session_id)
}
