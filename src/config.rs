use std::{str::FromStr, time::Duration};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::types::ScrapeError;

pub const DEFAULT_MAX_IMAGES: usize = 5;

/// Settle delays applied between pipeline actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delays {
    #[serde(with = "millis")]
    pub page_load: Duration,
    #[serde(with = "millis")]
    pub after_scroll: Duration,
    #[serde(with = "millis")]
    pub before_screenshot: Duration,
    #[serde(with = "millis")]
    pub before_close: Duration,
    #[serde(with = "millis")]
    pub between_actions: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Delays {
            page_load: Duration::from_millis(15_000),
            after_scroll: Duration::from_millis(10_000),
            before_screenshot: Duration::from_millis(3_000),
            before_close: Duration::from_millis(5_000),
            between_actions: Duration::from_millis(2_000),
        }
    }
}

impl Delays {
    pub fn zero() -> Self {
        Delays {
            page_load: Duration::ZERO,
            after_scroll: Duration::ZERO,
            before_screenshot: Duration::ZERO,
            before_close: Duration::ZERO,
            between_actions: Duration::ZERO,
        }
    }
}

/// Caller input for a new session. Every field is optional; unset fields fall
/// back to the server defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    pub click_images: Option<bool>,
    pub visit_contact: Option<bool>,
    pub max_images: Option<usize>,
    pub page_load_delay: Option<u64>,
    pub after_scroll_delay: Option<u64>,
    pub before_screenshot_delay: Option<u64>,
    pub before_close_delay: Option<u64>,
    pub between_actions_delay: Option<u64>,
}

/// Immutable configuration of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfig {
    pub url: String,
    pub click_images: bool,
    pub visit_contact: bool,
    pub max_images: usize,
    pub delays: Delays,
}

impl ScrapeConfig {
    pub fn from_options(
        url: &str,
        options: &ScrapeOptions,
        defaults: &Delays,
    ) -> Result<Self, ScrapeError> {
        let url = validate_url(url)?;
        let pick = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        Ok(ScrapeConfig {
            url,
            click_images: options.click_images.unwrap_or(true),
            visit_contact: options.visit_contact.unwrap_or(true),
            max_images: match options.max_images {
                Some(n) if n > 0 => n,
                _ => DEFAULT_MAX_IMAGES,
            },
            delays: Delays {
                page_load: pick(options.page_load_delay, defaults.page_load),
                after_scroll: pick(options.after_scroll_delay, defaults.after_scroll),
                before_screenshot: pick(
                    options.before_screenshot_delay,
                    defaults.before_screenshot,
                ),
                before_close: pick(options.before_close_delay, defaults.before_close),
                between_actions: pick(options.between_actions_delay, defaults.between_actions),
            },
        })
    }
}

/// Only absolute http(s) urls with a host are accepted.
pub fn validate_url(url: &str) -> Result<String, ScrapeError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::InvalidConfig("URL is required".into()));
    }
    let u = Url::from_str(trimmed)
        .map_err(|e| ScrapeError::InvalidConfig(format!("url passed is invalid {}: {}", url, e)))?;
    match u.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ScrapeError::InvalidConfig(format!(
                "unsupported scheme {} for {}",
                other, url
            )))
        }
    }
    if u.host_str().is_none() {
        return Err(ScrapeError::InvalidConfig(format!(
            "url must have a valid host {}",
            url
        )));
    }
    Ok(u.to_string())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
