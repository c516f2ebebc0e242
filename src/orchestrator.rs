use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream, StreamExt, TryStreamExt};
use tokio::time::{sleep, timeout};

use crate::{
    artifacts::ArtifactWriter,
    browser_controller::{get_scroll_script, SCROLL_TO_TOP_SCRIPT},
    config::ScrapeConfig,
    driver::{BrowserContext, BrowserDriver, LaunchSettings, PageTab},
    extractor::{extract_page_data, find_clickable_images, find_contact_link, snapshot_from_html},
    settle::SettlePolicy,
    store::SessionStore,
    types::{
        ClickableImage, ClickedImage, ContactPage, FileManifest, ScrapeError, ScrapeResult,
        ScrapeSession, ScrapeStatus, Severity,
    },
    utils::{contact_screenshot_name, homepage_screenshot_name, image_screenshot_name},
};

/// Server-side knobs shared by every session.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub launch: LaunchSettings,
    pub primary_timeout: Duration,
    pub image_timeout: Duration,
    pub contact_timeout: Duration,
    pub scroll_step_px: u32,
    pub scroll_interval: Duration,
    pub max_scroll_steps: u32,
    /// How many clicked-image tabs may be open at once.
    pub image_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            launch: LaunchSettings::default(),
            primary_timeout: Duration::from_secs(120),
            image_timeout: Duration::from_secs(30),
            contact_timeout: Duration::from_secs(60),
            scroll_step_px: 300,
            scroll_interval: Duration::from_millis(500),
            max_scroll_steps: 200,
            image_concurrency: 1,
        }
    }
}

/// Collaborators an orchestrator drives.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<SessionStore>,
    pub driver: Arc<dyn BrowserDriver>,
    pub writer: Arc<ArtifactWriter>,
    pub settle: Arc<dyn SettlePolicy>,
    pub settings: Arc<PipelineSettings>,
}

/// Drives one session through its stages. Only this orchestrator writes to
/// its session entry.
pub struct ScrapeOrchestrator {
    session_id: String,
    config: ScrapeConfig,
    pipeline: Pipeline,
    should_terminate: Arc<AtomicBool>,
}

impl ScrapeOrchestrator {
    pub fn new(
        session_id: &str,
        config: ScrapeConfig,
        pipeline: Pipeline,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        ScrapeOrchestrator {
            session_id: session_id.into(),
            config,
            pipeline,
            should_terminate,
        }
    }

    /// Runs the pipeline to a terminal state. The browser context is released
    /// before the session is marked completed or failed, whatever happened.
    pub async fn run(self) -> ScrapeStatus {
        let mut context: Option<Box<dyn BrowserContext>> = None;
        let outcome = self.drive(&mut context).await;

        if let Some(ctx) = context.take() {
            match ctx.close().await {
                Ok(_) => self.log(Severity::Info, "Browser closed").await,
                Err(e) => {
                    self.log(
                        Severity::Warning,
                        &format!("Browser did not close cleanly: {:#}", e),
                    )
                    .await
                }
            }
        }

        match outcome {
            Ok((result, files)) => {
                self.log(Severity::Info, "Scraping completed successfully!")
                    .await;
                self.update(|s| s.complete(files, result)).await;
                ScrapeStatus::Completed
            }
            Err(e) => {
                let message = e.to_string();
                self.log(Severity::Error, &format!("Error: {}", message)).await;
                self.update(|s| s.fail(&message)).await;
                ScrapeStatus::Error
            }
        }
    }

    async fn drive(
        &self,
        slot: &mut Option<Box<dyn BrowserContext>>,
    ) -> Result<(ScrapeResult, FileManifest), ScrapeError> {
        let delays = self.config.delays;
        let settings = self.pipeline.settings.clone();
        let settle = self.pipeline.settle.clone();

        self.log(Severity::Info, "Starting scraper...").await;
        self.enter(ScrapeStatus::Initializing, "Launching browser...")
            .await?;
        self.pipeline.writer.ensure_dirs().await?;
        let ctx = self
            .pipeline
            .driver
            .launch(&settings.launch)
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(format!("{:#}", e)))?;
        let ctx: &dyn BrowserContext = &**slot.insert(ctx);
        let page = ctx
            .open_tab()
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(format!("{:#}", e)))?;
        let page = &*page;

        self.enter(
            ScrapeStatus::LoadingPage,
            &format!("Navigating to {}...", self.config.url),
        )
        .await?;
        self.navigate(page, &self.config.url, settings.primary_timeout)
            .await?;

        self.enter(
            ScrapeStatus::WaitingContent,
            "Page loaded! Waiting for content...",
        )
        .await?;
        settle.settle(page, delays.page_load).await;

        self.enter(ScrapeStatus::Scrolling, "Scrolling to load all content...")
            .await?;
        self.scroll(page).await?;
        settle.settle(page, delays.after_scroll).await;

        self.enter(
            ScrapeStatus::ScreenshotHomepage,
            "Taking homepage screenshot...",
        )
        .await?;
        self.scroll_to_top(page).await?;
        settle.settle(page, delays.before_screenshot).await;
        let homepage_shot = self
            .capture(page, &homepage_screenshot_name(&self.session_id))
            .await?;

        self.log(Severity::Info, "Extracting homepage data...").await;
        // one capture of the homepage DOM serves every later read of it
        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::Extraction(format!("{:#}", e)))?;
        let page_url = page
            .url()
            .await
            .map_err(|e| ScrapeError::Extraction(format!("{:#}", e)))?;
        let mut result = ScrapeResult {
            homepage: snapshot_from_html(&html, &page_url),
            screenshots: vec![homepage_shot],
            clicked_images: vec![],
            contact_page: None,
        };

        if self.config.click_images {
            self.click_images(ctx, &html, &page_url, &mut result)
                .await?;
        }

        if self.config.visit_contact {
            self.visit_contact(ctx, &html, &page_url, &mut result)
                .await?;
        }

        self.enter(ScrapeStatus::SavingResults, "Saving results...")
            .await?;
        let files = self
            .pipeline
            .writer
            .write(&self.session_id, &result, &self.config, &html)
            .await?;
        self.log(
            Severity::Info,
            &format!("Saved {} files", files.artifact_count()),
        )
        .await;

        sleep(delays.before_close).await;
        Ok((result, files))
    }

    async fn click_images(
        &self,
        ctx: &dyn BrowserContext,
        html: &str,
        page_url: &str,
        result: &mut ScrapeResult,
    ) -> Result<(), ScrapeError> {
        self.enter(ScrapeStatus::ClickingImages, "Finding clickable images...")
            .await?;
        let candidates = find_clickable_images(html, page_url, self.config.max_images);
        let total = candidates.len();
        self.log(
            Severity::Info,
            &format!("Found {} clickable images", total),
        )
        .await;

        let done = AtomicUsize::new(0);
        let concurrency = self.pipeline.settings.image_concurrency.max(1);
        let visits: Vec<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, img)| self.process_image(ctx, i + 1, total, img, &done))
            .collect();
        // buffered keeps document order whatever the concurrency
        let clicked: Vec<Option<ClickedImage>> = stream::iter(visits)
            .buffered(concurrency)
            .try_collect()
            .await?;

        for img in clicked.into_iter().flatten() {
            result.screenshots.push(img.screenshot.clone());
            result.clicked_images.push(img);
        }
        Ok(())
    }

    /// One clicked image. Failures are logged and yield `None`; only
    /// cancellation escapes.
    async fn process_image(
        &self,
        ctx: &dyn BrowserContext,
        position: usize,
        total: usize,
        img: ClickableImage,
        done: &AtomicUsize,
    ) -> Result<Option<ClickedImage>, ScrapeError> {
        self.check_cancelled()?;
        self.log(
            Severity::Info,
            &format!("Processing image {}/{}: {}", position, total, img.alt),
        )
        .await;

        let name = image_screenshot_name(&self.session_id, position);
        let outcome = match self.visit_image(ctx, &img.link_href, &name).await {
            Ok(screenshot) => Some(ClickedImage {
                index: img.index,
                src: img.src,
                alt: img.alt,
                link_href: img.link_href,
                screenshot,
            }),
            Err(e) => {
                self.log(
                    Severity::Warning,
                    &format!("Error processing image {}: {}", position, e),
                )
                .await;
                None
            }
        };

        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
        let band = ScrapeStatus::ClickingImages;
        let progress =
            band.base_progress() + band.band_width() * finished as f64 / total as f64;
        self.update(|s| s.advance(band, progress)).await;

        // pause only after a page was actually visited
        if outcome.is_some() {
            sleep(self.config.delays.between_actions).await;
        }
        Ok(outcome)
    }

    async fn visit_image(
        &self,
        ctx: &dyn BrowserContext,
        url: &str,
        screenshot_name: &str,
    ) -> Result<String, ScrapeError> {
        let tab = ctx.open_tab().await.map_err(|e| ScrapeError::Navigation {
            url: url.into(),
            reason: format!("could not open tab: {:#}", e),
        })?;
        let tab = &*tab;

        let outcome = async {
            self.navigate(tab, url, self.pipeline.settings.image_timeout)
                .await?;
            self.pipeline
                .settle
                .settle(tab, self.config.delays.page_load)
                .await;
            self.capture(tab, screenshot_name).await
        }
        .await;

        self.close_tab(tab).await;
        outcome
    }

    async fn visit_contact(
        &self,
        ctx: &dyn BrowserContext,
        html: &str,
        page_url: &str,
        result: &mut ScrapeResult,
    ) -> Result<(), ScrapeError> {
        self.enter(ScrapeStatus::VisitingContact, "Looking for contact page...")
            .await?;

        let url = match find_contact_link(html, page_url) {
            Some(url) => url,
            None => {
                self.log(Severity::Warning, "Contact page not found").await;
                return Ok(());
            }
        };
        self.log(Severity::Info, &format!("Found contact page: {}", url))
            .await;

        match self.visit_contact_page(ctx, &url).await {
            Ok(contact) => {
                result.screenshots.push(contact.screenshot.clone());
                result.contact_page = Some(contact);
            }
            Err(ScrapeError::Cancelled) => return Err(ScrapeError::Cancelled),
            Err(e) => {
                self.log(
                    Severity::Warning,
                    &format!("Could not capture contact page: {}", e),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn visit_contact_page(
        &self,
        ctx: &dyn BrowserContext,
        url: &str,
    ) -> Result<ContactPage, ScrapeError> {
        let delays = self.config.delays;
        let settle = &self.pipeline.settle;
        let tab = ctx.open_tab().await.map_err(|e| ScrapeError::Navigation {
            url: url.into(),
            reason: format!("could not open tab: {:#}", e),
        })?;
        let tab = &*tab;

        let outcome = async {
            self.navigate(tab, url, self.pipeline.settings.contact_timeout)
                .await?;
            settle.settle(tab, delays.page_load).await;
            self.scroll(tab).await?;
            settle.settle(tab, delays.after_scroll).await;
            self.scroll_to_top(tab).await?;
            settle.settle(tab, delays.before_screenshot).await;
            let screenshot = self
                .capture(tab, &contact_screenshot_name(&self.session_id))
                .await?;
            let data = extract_page_data(tab)
                .await
                .map_err(|e| ScrapeError::Extraction(format!("{:#}", e)))?;
            Ok::<_, ScrapeError>(ContactPage {
                url: url.into(),
                data,
                screenshot,
            })
        }
        .await;

        self.close_tab(tab).await;
        outcome
    }

    async fn navigate(
        &self,
        tab: &dyn PageTab,
        url: &str,
        limit: Duration,
    ) -> Result<(), ScrapeError> {
        match timeout(limit, tab.navigate(url, limit)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScrapeError::Navigation {
                url: url.into(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(ScrapeError::NavigationTimeout {
                url: url.into(),
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn scroll(&self, tab: &dyn PageTab) -> Result<(), ScrapeError> {
        let settings = &self.pipeline.settings;
        let interval = settings.scroll_interval.as_millis() as u64;
        let script = get_scroll_script(settings.scroll_step_px, interval, settings.max_scroll_steps);
        debug!("[{}] scrolling....", self.session_id);
        if let Err(e) = tab.evaluate(&script, true).await {
            // we retry once, faster
            warn!("[{}] scrolling is retrying: {:#}", self.session_id, e);
            let script =
                get_scroll_script(settings.scroll_step_px, interval / 2, settings.max_scroll_steps);
            tab.evaluate(&script, true)
                .await
                .map_err(|e| ScrapeError::Script(format!("scrolling failed: {:#}", e)))?;
        }
        debug!("[{}] scrolling ended", self.session_id);
        Ok(())
    }

    async fn scroll_to_top(&self, tab: &dyn PageTab) -> Result<(), ScrapeError> {
        tab.evaluate(SCROLL_TO_TOP_SCRIPT, false)
            .await
            .map(|_| ())
            .map_err(|e| ScrapeError::Script(format!("could not scroll to top: {:#}", e)))
    }

    async fn capture(&self, tab: &dyn PageTab, name: &str) -> Result<String, ScrapeError> {
        let png = tab
            .screenshot()
            .await
            .map_err(|e| ScrapeError::Screenshot(format!("{:#}", e)))?;
        self.pipeline.writer.save_screenshot(name, &png).await
    }

    async fn close_tab(&self, tab: &dyn PageTab) {
        if let Err(e) = tab.close().await {
            debug!("[{}] could not close tab: {:#}", self.session_id, e);
        }
    }

    fn check_cancelled(&self) -> Result<(), ScrapeError> {
        if self.should_terminate.load(Ordering::Relaxed) {
            return Err(ScrapeError::Cancelled);
        }
        Ok(())
    }

    /// Logs the transition, then moves the session into `status`.
    async fn enter(&self, status: ScrapeStatus, message: &str) -> Result<(), ScrapeError> {
        self.check_cancelled()?;
        self.log(Severity::Info, message).await;
        self.update(|s| s.advance(status, status.base_progress()))
            .await;
        Ok(())
    }

    async fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("[{}] {}", self.session_id, message),
            Severity::Warning => warn!("[{}] {}", self.session_id, message),
            Severity::Error => error!("[{}] {}", self.session_id, message),
        }
        self.update(|s| s.push_log(severity, message)).await;
    }

    async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ScrapeSession),
    {
        if let Err(e) = self.pipeline.store.mutate(&self.session_id, f).await {
            warn!("could not update session {}: {}", self.session_id, e);
        }
    }
}
