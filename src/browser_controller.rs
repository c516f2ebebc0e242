use std::{
    ffi::OsStr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::{
    Emulation::SetDeviceMetricsOverride,
    Page::{CaptureScreenshotFormatOption, Viewport},
};
use headless_chrome::{browser::default_executable, Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::{json, Value};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::task;

use crate::driver::{BrowserContext, BrowserDriver, LaunchSettings, PageTab};

/// Incremental scroll that resolves once the covered distance reaches the
/// scrollable height, or after `max_steps` ticks for endless pages.
pub fn get_scroll_script(distance_px: u32, interval_ms: u64, max_steps: u32) -> String {
    format!(
        r#" new Promise((resolve) => {{
            var totalHeight = 0;
            var steps = 0;
            var distance = {};
            var timer = setInterval(() => {{
                var scrollHeight = document.body.scrollHeight;
                window.scrollBy(0, distance);
                totalHeight += distance;
                steps += 1;

                if(totalHeight >= scrollHeight || steps >= {}){{
                    clearInterval(timer);
                    resolve("ok");
                }}
            }}, {});
        }});"#,
        distance_px, max_steps, interval_ms
    )
}

pub const SCROLL_TO_TOP_SCRIPT: &str = "window.scrollTo(0, 0); true";

const PAGE_SIZE_SCRIPT: &str = r#"JSON.stringify({
    width: Math.max(document.documentElement.scrollWidth, window.innerWidth),
    height: Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0, window.innerHeight)
})"#;

#[derive(Deserialize)]
struct PageSize {
    width: f64,
    height: f64,
}

/// Device metrics applied to every new tab. Built from the protocol's wire
/// form so optional fields added by newer protocol revisions stay unset.
fn device_metrics(viewport: (u32, u32)) -> Result<SetDeviceMetricsOverride> {
    serde_json::from_value(json!({
        "width": viewport.0,
        "height": viewport.1,
        "deviceScaleFactor": 1,
        "mobile": false,
    }))
    .context("could not build device metrics")
}

/// Runs a blocking headless_chrome call off the async scheduler.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .context("problem spawning a blocking browser task")?
}

/// Launches one headless Chromium process per execution context.
pub struct BrowserController {
    executable: Option<PathBuf>,
    idle_timeout: Duration,
}

impl BrowserController {
    pub fn new(executable: Option<PathBuf>, idle_timeout: Duration) -> Self {
        BrowserController {
            executable,
            idle_timeout,
        }
    }

    fn resolve_executable(&self) -> Result<PathBuf> {
        if let Some(p) = &self.executable {
            return Ok(p.clone());
        }
        if let Ok(p) = std::env::var("CHROME_PATH") {
            return Ok(PathBuf::from(p));
        }
        default_executable().map_err(|e| anyhow!("Couldn't find appropriate Chrome binary: {}", e))
    }
}

#[async_trait]
impl BrowserDriver for BrowserController {
    async fn launch(&self, settings: &LaunchSettings) -> Result<Box<dyn BrowserContext>> {
        let path = self.resolve_executable()?;
        // warning only do this if in docker env
        let sandbox = settings.sandbox && std::env::var("IN_DOCKER").is_err();
        let viewport = settings.viewport;
        let idle = self.idle_timeout;
        let args = settings.args.clone();

        debug!("launching browser from {:?} (sandbox: {})", path, sandbox);
        let browser = blocking(move || {
            let args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();
            let options = LaunchOptions::default_builder()
                .path(Some(path))
                .window_size(Some(viewport))
                .idle_browser_timeout(idle)
                .sandbox(sandbox)
                .args(args)
                .build()
                .map_err(|e| anyhow!("could not build launch options: {}", e))?;
            Browser::new(options).context("browser launching error")
        })
        .await?;

        Ok(Box::new(ChromeContext {
            browser: Arc::new(browser),
            user_agent: settings.user_agent.clone(),
            viewport,
            tabs: Arc::new(Mutex::new(vec![])),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ChromeContext {
    browser: Arc<Browser>,
    user_agent: String,
    viewport: (u32, u32),
    tabs: Arc<Mutex<Vec<Arc<Tab>>>>,
    closed: AtomicBool,
}

impl ChromeContext {
    fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let mut s = System::new();
        let pid = Pid::from_u32(pid);
        s.refresh_process(pid);
        if let Some(process) = s.process(pid) {
            debug!("killing process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }

    fn open_tabs(&self) -> Vec<Arc<Tab>> {
        match self.tabs.lock() {
            Ok(mut tabs) => tabs.drain(..).collect(),
            Err(_) => vec![],
        }
    }
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn open_tab(&self) -> Result<Box<dyn PageTab>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("browser context already closed"));
        }
        let browser = self.browser.clone();
        let ua = self.user_agent.clone();
        let metrics = device_metrics(self.viewport)?;
        let tab = blocking(move || {
            let tab = browser.new_tab().context("could not create new tab")?;
            tab.set_user_agent(&ua, None, None)
                .context("could not set user agent")?;
            tab.call_method(metrics)
                .context("could not set tab viewport")?;
            Ok(tab)
        })
        .await?;

        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.push(tab.clone());
        }
        Ok(Box::new(ChromeTab {
            tab,
            registry: self.tabs.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let tabs = self.open_tabs();
        if !tabs.is_empty() {
            debug!("closing {} tabs left open", tabs.len());
            blocking(move || {
                for tab in tabs {
                    if let Err(e) = tab.close(false) {
                        warn!("could not close tab {}: {}", tab.get_url(), e);
                    }
                }
                Ok(())
            })
            .await?;
        }
        debug!("killing browser process...");
        self.kill();
        Ok(())
    }
}

impl Drop for ChromeContext {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("browser context dropped without close, killing process...");
            self.kill();
        }
    }
}

pub struct ChromeTab {
    tab: Arc<Tab>,
    registry: Arc<Mutex<Vec<Arc<Tab>>>>,
}

#[async_trait]
impl PageTab for ChromeTab {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let tab = self.tab.clone();
        let u = url.to_string();
        debug!("navigating to {}", url);
        blocking(move || {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&u)
                .context(format!("could not navigate to {}", u))?
                .wait_until_navigated()
                .context(format!("error waiting for navigation to {}", u))?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str, await_promise: bool) -> Result<Value> {
        let tab = self.tab.clone();
        let script = script.to_string();
        blocking(move || {
            let obj = tab
                .evaluate(&script, await_promise)
                .context("script evaluation failed")?;
            Ok(obj.value.unwrap_or(Value::Null))
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let size = self.evaluate(PAGE_SIZE_SCRIPT, false).await?;
        let size: PageSize = match size.as_str() {
            Some(s) => serde_json::from_str(s).context("could not read page dimensions")?,
            None => return Err(anyhow!("page dimensions unavailable")),
        };
        let tab = self.tab.clone();
        debug!("taking screenshot of {}x{}", size.width, size.height);
        blocking(move || {
            let clip = Viewport {
                x: 0.0,
                y: 0.0,
                width: size.width,
                height: size.height,
                scale: 1.0,
            };
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, Some(clip), true)
                .context(format!("screenshot for {} could not be captured", tab.get_url()))
        })
        .await
    }

    async fn content(&self) -> Result<String> {
        let tab = self.tab.clone();
        blocking(move || tab.get_content().context("could not read page content")).await
    }

    async fn url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut tabs) = self.registry.lock() {
            tabs.retain(|t| !Arc::ptr_eq(t, &self.tab));
        }
        let tab = self.tab.clone();
        blocking(move || {
            tab.close(false).context("could not close tab")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_metrics_follow_viewport() {
        let m = device_metrics((1920, 1080)).unwrap();
        assert_eq!(m.width, 1920);
        assert_eq!(m.height, 1080);
        assert_eq!(m.device_scale_factor, 1.0);
        assert!(!m.mobile);
        assert!(m.scale.is_none());
    }

    #[test]
    fn scroll_script_carries_parameters() {
        let s = get_scroll_script(300, 500, 200);
        assert!(s.contains("var distance = 300;"));
        assert!(s.contains("steps >= 200"));
        assert!(s.contains("}, 500);"));
    }
}
