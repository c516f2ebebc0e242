#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scrapeshot::{
    artifacts::ArtifactWriter,
    driver::{BrowserContext, BrowserDriver, LaunchSettings, PageTab},
    orchestrator::{Pipeline, PipelineSettings},
    settle::FixedDelay,
    store::SessionStore,
};
use serde_json::Value;
use tempfile::TempDir;

pub const SITE: &str = "https://site.test/";
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Homepage with `n` linked images, one unlinked image and a contact link.
pub fn homepage(n: usize, with_contact: bool) -> String {
    let mut body = String::from("<h1>Site</h1><h2>Intro</h2><img src=\"/logo.png\" alt=\"logo\">");
    for i in 1..=n {
        body.push_str(&format!(
            "<a href=\"/p/{i}\"><img src=\"/img/{i}.png\" alt=\"pic {i}\"></a>"
        ));
    }
    if with_contact {
        body.push_str("<a href=\"/contact\">Contact us</a>");
    }
    format!("<html><head><title>Site</title></head><body>{body}</body></html>")
}

pub fn product_url(i: usize) -> String {
    format!("{SITE}p/{i}")
}

pub fn contact_url() -> String {
    format!("{SITE}contact")
}

/// In-memory web the fake browser serves from.
#[derive(Default)]
pub struct FakeWeb {
    pages: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    pub fail_launch: AtomicBool,
    pub fail_scripts: AtomicBool,
    pub launches: AtomicUsize,
    pub context_closes: AtomicUsize,
    pub tabs_opened: AtomicUsize,
    pub tabs_closed: AtomicUsize,
    open_tabs: AtomicUsize,
    pub max_open_tabs: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeWeb::default())
    }

    /// A site with `n` linked images and, optionally, a contact page.
    pub fn site(n: usize, with_contact: bool) -> Arc<Self> {
        let web = FakeWeb::new();
        web.page(SITE, &homepage(n, with_contact));
        for i in 1..=n {
            web.page(
                &product_url(i),
                &format!("<html><head><title>Product {i}</title></head></html>"),
            );
        }
        if with_contact {
            web.page(
                &contact_url(),
                "<html><head><title>Contact</title></head><body><h1>Reach us</h1></body></html>",
            );
        }
        web
    }

    pub fn page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.into(), html.into());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.into());
    }

    pub fn slow(&self, url: &str, d: Duration) {
        self.slow.lock().unwrap().insert(url.into(), d);
    }

    pub fn navigated(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

pub struct FakeDriver {
    pub web: Arc<FakeWeb>,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self, _settings: &LaunchSettings) -> Result<Box<dyn BrowserContext>> {
        if self.web.fail_launch.load(Ordering::SeqCst) {
            return Err(anyhow!("no chrome binary"));
        }
        self.web.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            web: self.web.clone(),
        }))
    }
}

struct FakeContext {
    web: Arc<FakeWeb>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn open_tab(&self) -> Result<Box<dyn PageTab>> {
        self.web.tabs_opened.fetch_add(1, Ordering::SeqCst);
        let open = self.web.open_tabs.fetch_add(1, Ordering::SeqCst) + 1;
        self.web.max_open_tabs.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeTab {
            web: self.web.clone(),
            current: Mutex::new("about:blank".into()),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.web.context_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeTab {
    web: Arc<FakeWeb>,
    current: Mutex<String>,
}

#[async_trait]
impl PageTab for FakeTab {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.web.navigations.lock().unwrap().push(url.into());
        let delay = self.web.slow.lock().unwrap().get(url).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.web.failing.lock().unwrap().contains(url) {
            return Err(anyhow!("net::ERR_CONNECTION_REFUSED"));
        }
        if !self.web.pages.lock().unwrap().contains_key(url) {
            return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED"));
        }
        *self.current.lock().unwrap() = url.into();
        Ok(())
    }

    async fn evaluate(&self, script: &str, _await_promise: bool) -> Result<Value> {
        if script.contains("readyState") {
            return Ok(Value::String("complete".into()));
        }
        if self.web.fail_scripts.load(Ordering::SeqCst) {
            return Err(anyhow!("Execution context was destroyed"));
        }
        Ok(Value::Bool(true))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(PNG.to_vec())
    }

    async fn content(&self) -> Result<String> {
        let url = self.current.lock().unwrap().clone();
        Ok(self
            .web
            .pages
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| "<html></html>".into()))
    }

    async fn url(&self) -> Result<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<()> {
        self.web.tabs_closed.fetch_add(1, Ordering::SeqCst);
        self.web.open_tabs.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn settings(image_concurrency: usize) -> PipelineSettings {
    PipelineSettings {
        primary_timeout: Duration::from_secs(5),
        image_timeout: Duration::from_secs(5),
        contact_timeout: Duration::from_secs(5),
        scroll_interval: Duration::from_millis(1),
        image_concurrency,
        ..PipelineSettings::default()
    }
}

pub fn pipeline(web: &Arc<FakeWeb>, dir: &TempDir, settings: PipelineSettings) -> Pipeline {
    Pipeline {
        store: Arc::new(SessionStore::default()),
        driver: Arc::new(FakeDriver { web: web.clone() }),
        writer: Arc::new(ArtifactWriter::new(
            dir.path().join("screenshots"),
            dir.path().join("output"),
            "/screenshots",
            "/output",
        )),
        settle: Arc::new(FixedDelay),
        settings: Arc::new(settings),
    }
}
