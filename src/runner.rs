use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    artifacts::ArtifactWriter,
    config::{Delays, ScrapeConfig, ScrapeOptions},
    driver::{BrowserDriver, LaunchSettings, DEFAULT_USER_AGENT},
    orchestrator::{Pipeline, PipelineSettings, ScrapeOrchestrator},
    settle::{FixedDelay, ReadyStateSettle, SettlePolicy},
    store::{RetentionPolicy, SessionStore},
    types::{FileManifest, ScrapeError, ScrapeSession, SessionStatus, StartResponse},
    utils::{OUTPUT_ROUTE, SCREENSHOT_ROUTE},
};

/// How the pipeline waits for a page between actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Always wait the configured delay.
    Fixed,
    /// Return early once the document reports it is complete.
    ReadyState,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // directory where screenshots are written
    #[builder(default = "self.default_screenshot_dir()")]
    screenshot_dir: PathBuf,
    // directory where json, report and html files are written
    #[builder(default = "self.default_output_dir()")]
    output_dir: PathBuf,
    // public route prefixes used in file manifests
    #[builder(default = "SCREENSHOT_ROUTE.into()")]
    screenshot_route: String,
    #[builder(default = "OUTPUT_ROUTE.into()")]
    output_route: String,
    // explicit chrome executable, otherwise CHROME_PATH or the default lookup
    #[builder(default = "None")]
    chrome_path: Option<PathBuf>,
    #[builder(default = "DEFAULT_USER_AGENT.into()")]
    user_agent: String,
    #[builder(default = "(1920, 1080)")]
    viewport: (u32, u32),
    #[builder(default = "true")]
    sandbox: bool,
    // browser idle timeout in seconds
    #[builder(default = "180")]
    browser_idle_timeout: u64,
    // navigation timeouts in seconds
    #[builder(default = "120")]
    primary_timeout: u64,
    #[builder(default = "30")]
    image_timeout: u64,
    #[builder(default = "60")]
    contact_timeout: u64,
    #[builder(default = "300")]
    scroll_step_px: u32,
    // milliseconds between scroll steps
    #[builder(default = "500")]
    scroll_interval: u64,
    #[builder(default = "200")]
    max_scroll_steps: u32,
    // tabs open at once while visiting clicked images
    #[builder(default = "1")]
    image_concurrency: usize,
    #[builder(default = "SettleMode::Fixed")]
    settle_mode: SettleMode,
    // delays used when a request leaves them unset
    #[builder(default = "Delays::default()")]
    default_delays: Delays,
    #[builder(default = "RetentionPolicy::keep_all()")]
    retention: RetentionPolicy,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }

    pub fn chrome_path(&self) -> Option<PathBuf> {
        self.chrome_path.clone()
    }

    pub fn browser_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_idle_timeout)
    }
}

impl RunnerOptionsBuilder {
    fn default_screenshot_dir(&self) -> PathBuf {
        PathBuf::from("screenshots")
    }
    fn default_output_dir(&self) -> PathBuf {
        PathBuf::from("output")
    }
}

/// Entry point for callers: starts sessions in the background and answers
/// status, file and cancel requests by session id.
pub struct Runner {
    pipeline: Pipeline,
    default_delays: Delays,
    running: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl Runner {
    pub fn new(options: RunnerOptions, driver: Arc<dyn BrowserDriver>) -> Self {
        let settle: Arc<dyn SettlePolicy> = match options.settle_mode {
            SettleMode::Fixed => Arc::new(FixedDelay),
            SettleMode::ReadyState => Arc::new(ReadyStateSettle::default()),
        };
        let mut launch = LaunchSettings::default();
        launch.viewport = options.viewport;
        launch.user_agent = options.user_agent.clone();
        launch.sandbox = options.sandbox;

        let settings = PipelineSettings {
            launch,
            primary_timeout: Duration::from_secs(options.primary_timeout),
            image_timeout: Duration::from_secs(options.image_timeout),
            contact_timeout: Duration::from_secs(options.contact_timeout),
            scroll_step_px: options.scroll_step_px,
            scroll_interval: Duration::from_millis(options.scroll_interval),
            max_scroll_steps: options.max_scroll_steps,
            image_concurrency: options.image_concurrency.max(1),
        };

        debug!("runner created with {:#?}", options);
        Runner {
            pipeline: Pipeline {
                store: Arc::new(SessionStore::new(options.retention)),
                driver,
                writer: Arc::new(ArtifactWriter::new(
                    options.screenshot_dir,
                    options.output_dir,
                    &options.screenshot_route,
                    &options.output_route,
                )),
                settle,
                settings: Arc::new(settings),
            },
            default_delays: options.default_delays,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validates the request, registers a session and runs it in the
    /// background. Nothing is registered when validation fails.
    pub async fn start(
        &self,
        url: &str,
        options: &ScrapeOptions,
    ) -> Result<StartResponse, ScrapeError> {
        let config = ScrapeConfig::from_options(url, options, &self.default_delays)?;
        let session_id = self.pipeline.store.create().await;
        info!("[{}] scrape of {} registered", session_id, config.url);

        let cancel = Arc::new(AtomicBool::new(false));
        self.running
            .lock()
            .await
            .insert(session_id.clone(), cancel.clone());

        let orchestrator =
            ScrapeOrchestrator::new(&session_id, config.clone(), self.pipeline.clone(), cancel);
        let running = self.running.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let status = orchestrator.run().await;
            running.lock().await.remove(&id);
            debug!("[{}] finished with status {}", id, status);
        });

        Ok(StartResponse { session_id, config })
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, ScrapeError> {
        self.session(session_id).await.map(|s| s.status_view())
    }

    /// File manifest of a session, present only once it completed.
    pub async fn files(&self, session_id: &str) -> Result<Option<FileManifest>, ScrapeError> {
        self.session(session_id).await.map(|s| s.files)
    }

    pub async fn session(&self, session_id: &str) -> Result<ScrapeSession, ScrapeError> {
        self.pipeline
            .store
            .get(session_id)
            .await
            .ok_or_else(|| ScrapeError::SessionNotFound(session_id.into()))
    }

    /// Asks a running session to stop at its next checkpoint. Returns whether
    /// the session was still running.
    pub async fn cancel(&self, session_id: &str) -> Result<bool, ScrapeError> {
        if !self.pipeline.store.contains(session_id).await {
            return Err(ScrapeError::SessionNotFound(session_id.into()));
        }
        match self.running.lock().await.get(session_id) {
            Some(flag) => {
                info!("[{}] cancellation requested", session_id);
                flag.store(true, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancels every running session.
    pub async fn cancel_all(&self) {
        for (id, flag) in self.running.lock().await.iter() {
            debug!("[{}] cancelling", id);
            flag.store(true, Ordering::Relaxed);
        }
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }
}
