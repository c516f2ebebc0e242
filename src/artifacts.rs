use std::{fmt::Write as _, path::PathBuf};

use chrono::{DateTime, Utc};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    config::ScrapeConfig,
    types::{FileManifest, ScrapeError, ScrapeResult},
    utils::{data_file_name, html_file_name, report_file_name},
};

/// Persists a session's screenshots and output files. Every file name carries
/// the session id and existing files are never overwritten.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    screenshot_dir: PathBuf,
    output_dir: PathBuf,
    screenshot_route: String,
    output_route: String,
}

impl ArtifactWriter {
    pub fn new(
        screenshot_dir: PathBuf,
        output_dir: PathBuf,
        screenshot_route: &str,
        output_route: &str,
    ) -> Self {
        ArtifactWriter {
            screenshot_dir,
            output_dir,
            screenshot_route: screenshot_route.trim_end_matches('/').into(),
            output_route: output_route.trim_end_matches('/').into(),
        }
    }

    pub async fn ensure_dirs(&self) -> Result<(), ScrapeError> {
        for dir in [&self.screenshot_dir, &self.output_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                ScrapeError::Artifact(format!("could not create directory {:?}: {}", dir, e))
            })?;
        }
        Ok(())
    }

    /// Stores a screenshot and returns its file reference.
    pub async fn save_screenshot(&self, name: &str, png: &[u8]) -> Result<String, ScrapeError> {
        let path = self.screenshot_dir.join(name);
        debug!("saving screenshot to {:?}", path);
        create_new(&path, png).await?;
        Ok(name.into())
    }

    /// Writes the structured result, the text report and the homepage markup
    /// and returns the public locations of every artifact of the session.
    pub async fn write(
        &self,
        session_id: &str,
        result: &ScrapeResult,
        config: &ScrapeConfig,
        homepage_html: &str,
    ) -> Result<FileManifest, ScrapeError> {
        self.ensure_dirs().await?;

        let json_file = data_file_name(session_id);
        let report_file = report_file_name(session_id);
        let html_file = html_file_name(session_id);

        let json = serde_json::to_string_pretty(result)
            .map_err(|e| ScrapeError::Artifact(format!("could not serialize results: {}", e)))?;
        create_new(&self.output_dir.join(&json_file), json.as_bytes()).await?;

        let report = render_report(result, config, Utc::now());
        create_new(&self.output_dir.join(&report_file), report.as_bytes()).await?;

        create_new(&self.output_dir.join(&html_file), homepage_html.as_bytes()).await?;

        Ok(FileManifest {
            screenshots: result
                .screenshots
                .iter()
                .map(|s| format!("{}/{}", self.screenshot_route, s))
                .collect(),
            json: format!("{}/{}", self.output_route, json_file),
            report: format!("{}/{}", self.output_route, report_file),
            html: format!("{}/{}", self.output_route, html_file),
        })
    }
}

async fn create_new(path: &PathBuf, bytes: &[u8]) -> Result<(), ScrapeError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| ScrapeError::Artifact(format!("could not create {:?}: {}", path, e)))?;
    file.write_all(bytes)
        .await
        .map_err(|e| ScrapeError::Artifact(format!("could not write {:?}: {}", path, e)))?;
    file.flush()
        .await
        .map_err(|e| ScrapeError::Artifact(format!("could not flush {:?}: {}", path, e)))?;
    Ok(())
}

/// Plain-text summary of a finished session.
pub fn render_report(
    result: &ScrapeResult,
    config: &ScrapeConfig,
    captured_at: DateTime<Utc>,
) -> String {
    let home = &result.homepage;
    let mut r = String::new();

    // writing into a String cannot fail
    let _ = writeln!(r, "WEB SCRAPER - COMPLETE REPORT");
    let _ = writeln!(r, "==============================\n");
    let _ = writeln!(r, "URL: {}", config.url);
    let _ = writeln!(r, "Scraped: {}\n", captured_at.format("%Y-%m-%d %H:%M:%S UTC"));

    let _ = writeln!(r, "HOMEPAGE:");
    let _ = writeln!(r, "  Title: {}", home.title);
    let _ = writeln!(r, "  Heading: {}", home.heading);
    let _ = writeln!(r, "  Sections: {}", home.sections.len());
    let _ = writeln!(r, "  Links: {}", home.links.len());
    let _ = writeln!(r, "  Images: {}\n", home.images.len());

    if !result.clicked_images.is_empty() {
        let _ = writeln!(r, "CLICKED IMAGES: {}", result.clicked_images.len());
        for (i, img) in result.clicked_images.iter().enumerate() {
            let _ = writeln!(r, "  {}. {}", i + 1, img.alt);
        }
        let _ = writeln!(r);
    }

    if let Some(contact) = &result.contact_page {
        let _ = writeln!(r, "CONTACT PAGE:");
        let _ = writeln!(r, "  URL: {}", contact.url);
        let _ = writeln!(r, "  Title: {}\n", contact.data.title);
    }

    let _ = writeln!(r, "SCREENSHOTS: {}", result.screenshots.len());
    let _ = writeln!(
        r,
        "FILES GENERATED: JSON, HTML, Report, {} images",
        result.screenshots.len()
    );
    r
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::Delays,
        types::{ClickedImage, ContactPage, PageSnapshot},
    };
    use chrono::TimeZone;

    fn config() -> ScrapeConfig {
        ScrapeConfig {
            url: "https://example.test/".into(),
            click_images: true,
            visit_contact: true,
            max_images: 5,
            delays: Delays::zero(),
        }
    }

    fn result() -> ScrapeResult {
        ScrapeResult {
            homepage: PageSnapshot {
                title: "Example".into(),
                heading: "Hi".into(),
                sections: vec!["a".into(), "b".into()],
                ..Default::default()
            },
            screenshots: vec!["s-01-homepage.png".into(), "s-02-image-1.png".into()],
            clicked_images: vec![ClickedImage {
                index: 0,
                src: "https://example.test/a.png".into(),
                alt: "cat".into(),
                link_href: "https://example.test/cat".into(),
                screenshot: "s-02-image-1.png".into(),
            }],
            contact_page: Some(ContactPage {
                url: "https://example.test/contact".into(),
                data: PageSnapshot {
                    title: "Contact us".into(),
                    ..Default::default()
                },
                screenshot: "s-03-contact.png".into(),
            }),
        }
    }

    #[test]
    fn report_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let a = render_report(&result(), &config(), at);
        let b = render_report(&result(), &config(), at);
        assert_eq!(a, b);
        assert!(a.starts_with("WEB SCRAPER - COMPLETE REPORT\n"));
        assert!(a.contains("URL: https://example.test/\n"));
        assert!(a.contains("Scraped: 2024-05-01 12:30:00 UTC\n"));
        assert!(a.contains("  Sections: 2\n"));
        assert!(a.contains("CLICKED IMAGES: 1\n  1. cat\n"));
        assert!(a.contains("  Title: Contact us\n"));
        assert!(a.ends_with("FILES GENERATED: JSON, HTML, Report, 2 images\n"));
    }

    #[test]
    fn report_omits_empty_sections() {
        let r = render_report(&ScrapeResult::default(), &config(), Utc::now());
        assert!(!r.contains("CLICKED IMAGES"));
        assert!(!r.contains("CONTACT PAGE"));
        assert!(r.contains("SCREENSHOTS: 0\n"));
    }

    #[test]
    fn writes_manifest_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let w = ArtifactWriter::new(
            dir.path().join("shots"),
            dir.path().join("out"),
            "/screenshots/",
            "/output",
        );
        let manifest =
            tokio_test::block_on(w.write("s", &result(), &config(), "<html></html>")).unwrap();
        assert_eq!(
            manifest.screenshots,
            vec![
                "/screenshots/s-01-homepage.png",
                "/screenshots/s-02-image-1.png"
            ]
        );
        assert_eq!(manifest.json, "/output/s-data.json");
        assert_eq!(manifest.artifact_count(), 5);

        let json = std::fs::read_to_string(dir.path().join("out/s-data.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["clickedImages"][0]["linkHref"], "https://example.test/cat");
        assert!(v["homepage"]["adMarkers"]["iframeCount"].is_number());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/s-homepage.html")).unwrap(),
            "<html></html>"
        );

        let again = tokio_test::block_on(w.write("s", &result(), &config(), "<html></html>"));
        assert!(matches!(again, Err(ScrapeError::Artifact(_))));
    }
}
