use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ScrapeConfig;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("invalid_config: {0}")]
    InvalidConfig(String),
    #[error("browser_launch: {0}")]
    BrowserLaunch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },
    #[error("script: {0}")]
    Script(String),
    #[error("screenshot: {0}")]
    Screenshot(String),
    #[error("extraction: {0}")]
    Extraction(String),
    #[error("artifact: {0}")]
    Artifact(String),
    #[error("cancelled")]
    Cancelled,
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Starting,
    Initializing,
    LoadingPage,
    WaitingContent,
    Scrolling,
    ScreenshotHomepage,
    ClickingImages,
    VisitingContact,
    SavingResults,
    Completed,
    Error,
}

impl ScrapeStatus {
    /// Progress value reached when the stage is entered.
    pub fn base_progress(&self) -> f64 {
        match self {
            ScrapeStatus::Starting => 0.0,
            ScrapeStatus::Initializing => 5.0,
            ScrapeStatus::LoadingPage => 10.0,
            ScrapeStatus::WaitingContent => 20.0,
            ScrapeStatus::Scrolling => 30.0,
            ScrapeStatus::ScreenshotHomepage => 40.0,
            ScrapeStatus::ClickingImages => 50.0,
            ScrapeStatus::VisitingContact => 75.0,
            ScrapeStatus::SavingResults => 90.0,
            ScrapeStatus::Completed => 100.0,
            // error freezes whatever was reached
            ScrapeStatus::Error => 0.0,
        }
    }

    /// Width of the band a stage may interpolate across before the next one.
    pub fn band_width(&self) -> f64 {
        match self {
            ScrapeStatus::ClickingImages => 20.0,
            _ => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScrapeStatus::Completed | ScrapeStatus::Error)
    }

    /// Pipeline position, used to refuse backward transitions.
    pub fn ordinal(&self) -> u8 {
        match self {
            ScrapeStatus::Starting => 0,
            ScrapeStatus::Initializing => 1,
            ScrapeStatus::LoadingPage => 2,
            ScrapeStatus::WaitingContent => 3,
            ScrapeStatus::Scrolling => 4,
            ScrapeStatus::ScreenshotHomepage => 5,
            ScrapeStatus::ClickingImages => 6,
            ScrapeStatus::VisitingContact => 7,
            ScrapeStatus::SavingResults => 8,
            ScrapeStatus::Completed => 9,
            ScrapeStatus::Error => 10,
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScrapeStatus::Starting => "starting",
            ScrapeStatus::Initializing => "initializing",
            ScrapeStatus::LoadingPage => "loading_page",
            ScrapeStatus::WaitingContent => "waiting_content",
            ScrapeStatus::Scrolling => "scrolling",
            ScrapeStatus::ScreenshotHomepage => "screenshot_homepage",
            ScrapeStatus::ClickingImages => "clicking_images",
            ScrapeStatus::VisitingContact => "visiting_contact",
            ScrapeStatus::SavingResults => "saving_results",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    pub alt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMarkers {
    pub iframe_count: usize,
    pub ad_slot_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub title: String,
    pub url: String,
    pub heading: String,
    pub sections: Vec<String>,
    pub links: Vec<Link>,
    pub images: Vec<Image>,
    pub ad_markers: AdMarkers,
}

/// An image wrapped in a link, found on the homepage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickableImage {
    /// Position of the image among all `img` elements of the page.
    pub index: usize,
    pub src: String,
    pub alt: String,
    pub link_href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickedImage {
    pub index: usize,
    pub src: String,
    pub alt: String,
    pub link_href: String,
    pub screenshot: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPage {
    pub url: String,
    pub data: PageSnapshot,
    pub screenshot: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub homepage: PageSnapshot,
    pub screenshots: Vec<String>,
    pub clicked_images: Vec<ClickedImage>,
    pub contact_page: Option<ContactPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub screenshots: Vec<String>,
    pub json: String,
    pub report: String,
    pub html: String,
}

impl FileManifest {
    pub fn artifact_count(&self) -> usize {
        self.screenshots.len() + 3
    }
}

/// Mutable state of one scrape request, owned by the session store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeSession {
    pub id: String,
    pub status: ScrapeStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<FileManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScrapeResult>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScrapeSession {
    pub fn new(id: &str) -> Self {
        ScrapeSession {
            id: id.into(),
            status: ScrapeStatus::Starting,
            progress: 0.0,
            logs: vec![],
            error: None,
            files: None,
            results: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Appends a log entry, never letting timestamps run backwards.
    pub fn push_log(&mut self, severity: Severity, message: &str) {
        let mut time = Utc::now();
        if let Some(last) = self.logs.last() {
            if last.time > time {
                time = last.time;
            }
        }
        self.logs.push(LogEntry {
            time,
            severity,
            message: message.into(),
        });
    }

    /// Moves the session forward. Backward stage moves, progress regressions
    /// and any change after a terminal state are ignored.
    pub fn advance(&mut self, status: ScrapeStatus, progress: f64) {
        if self.status.is_terminal() || status == ScrapeStatus::Error {
            return;
        }
        if status.ordinal() < self.status.ordinal() {
            return;
        }
        self.status = status;
        if progress > self.progress {
            self.progress = progress.min(100.0);
        }
    }

    pub fn complete(&mut self, files: FileManifest, results: ScrapeResult) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScrapeStatus::Completed;
        self.progress = 100.0;
        self.files = Some(files);
        self.results = Some(results);
        self.finished_at = Some(Utc::now());
    }

    /// Terminal failure; progress stays where it was.
    pub fn fail(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScrapeStatus::Error;
        self.error = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn status_view(&self) -> SessionStatus {
        SessionStatus {
            status: self.status,
            progress: self.progress,
            logs: self.logs.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub status: ScrapeStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    /// The last `n` log entries, oldest first.
    pub fn recent_logs(&self, n: usize) -> &[LogEntry] {
        let start = self.logs.len().saturating_sub(n);
        &self.logs[start..]
    }
}

/// Answer to a start request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
    pub config: ScrapeConfig,
}
