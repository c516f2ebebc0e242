//! Browser capability consumed by the orchestrator.
//!
//! `BrowserDriver` launches isolated execution contexts, a `BrowserContext`
//! opens tabs, and a `PageTab` is one navigable surface. The headless
//! Chromium implementation lives in `browser_controller`; tests plug in
//! an in-memory fake.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Identity and window settings applied to every context and its tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub viewport: (u32, u32),
    pub user_agent: String,
    /// Extra command line switches passed to the engine.
    pub args: Vec<String>,
    pub sandbox: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        LaunchSettings {
            viewport: (1920, 1080),
            user_agent: DEFAULT_USER_AGENT.into(),
            args: vec![
                "--disable-setuid-sandbox".into(),
                "--disable-dev-shm-usage".into(),
                "--disable-accelerated-2d-canvas".into(),
                "--no-first-run".into(),
                "--no-zygote".into(),
                "--disable-gpu".into(),
                "--disable-blink-features=AutomationControlled".into(),
            ],
            sandbox: true,
        }
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start a fresh, isolated execution context. Contexts are never shared
    /// between sessions.
    async fn launch(&self, settings: &LaunchSettings) -> Result<Box<dyn BrowserContext>>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open a new tab with the context's viewport and user agent.
    async fn open_tab(&self) -> Result<Box<dyn PageTab>>;
    /// Release the context, closing any tab still open.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PageTab: Send + Sync {
    /// Navigate and wait until the document is minimally parsed.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    /// Evaluate a script in the document, optionally awaiting a returned promise.
    async fn evaluate(&self, script: &str, await_promise: bool) -> Result<Value>;
    /// PNG of the full scrollable page.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Serialized markup of the current DOM.
    async fn content(&self) -> Result<String>;
    /// Current document url.
    async fn url(&self) -> Result<String>;
    async fn close(&self) -> Result<()>;
}
