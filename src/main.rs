use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use clap::Parser;
use log::debug;
use scrapeshot::{
    browser_controller::BrowserController,
    config::ScrapeOptions,
    runner::{Runner, RunnerOptions, SettleMode},
    types::ScrapeStatus,
};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Headless website capture CLI", long_about = None)]
struct Args {
    /// Page to capture
    url: String,
    /// Do not follow image links
    #[arg(long)]
    no_click_images: bool,
    /// Do not look for a contact page
    #[arg(long)]
    no_contact: bool,
    /// Maximum number of linked images to visit
    #[arg(short = 'm', long)]
    max_images: Option<usize>,
    /// Wait after a page loads, in milliseconds
    #[arg(long)]
    page_load_delay: Option<u64>,
    /// Wait after scrolling, in milliseconds
    #[arg(long)]
    after_scroll_delay: Option<u64>,
    /// Wait before a screenshot, in milliseconds
    #[arg(long)]
    before_screenshot_delay: Option<u64>,
    /// Wait before closing the browser, in milliseconds
    #[arg(long)]
    before_close_delay: Option<u64>,
    /// Wait between image visits, in milliseconds
    #[arg(long)]
    between_actions_delay: Option<u64>,
    /// Directory where screenshots are written
    #[arg(short = 's', long, default_value = "screenshots")]
    screenshot_dir: PathBuf,
    /// Directory where json, report and html files are written
    #[arg(short = 'o', long, default_value = "output")]
    output_dir: PathBuf,
    /// Number of image pages visited at once
    #[arg(short = 't', long, default_value_t = 1)]
    image_concurrency: usize,
    /// Stop waiting as soon as the document is complete
    #[arg(long)]
    ready_state: bool,
    /// Chrome executable to use
    #[arg(long)]
    chrome_path: Option<PathBuf>,
    /// Maximum time in seconds for the main page to load
    #[arg(long, default_value_t = 120)]
    browser_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("Starting scrapeshot with {:#?}", args.clone());

    let options = RunnerOptions::default_builder()
        .screenshot_dir(args.screenshot_dir)
        .output_dir(args.output_dir)
        .chrome_path(args.chrome_path.clone())
        .image_concurrency(args.image_concurrency)
        .primary_timeout(args.browser_timeout)
        .settle_mode(if args.ready_state {
            SettleMode::ReadyState
        } else {
            SettleMode::Fixed
        })
        .build()?;

    let driver = Arc::new(BrowserController::new(
        options.chrome_path(),
        options.browser_idle_timeout(),
    ));
    let runner = Runner::new(options, driver);

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let request = ScrapeOptions {
        click_images: Some(!args.no_click_images),
        visit_contact: Some(!args.no_contact),
        max_images: args.max_images,
        page_load_delay: args.page_load_delay,
        after_scroll_delay: args.after_scroll_delay,
        before_screenshot_delay: args.before_screenshot_delay,
        before_close_delay: args.before_close_delay,
        between_actions_delay: args.between_actions_delay,
    };
    let started = runner
        .start(&args.url, &request)
        .await
        .context(format!("could not start scraping {}", args.url))?;
    let id = started.session_id;
    println!("session {} started", id);

    let mut printed = 0;
    let mut cancelled = false;
    loop {
        if should_terminate.load(Ordering::Relaxed) && !cancelled {
            runner.cancel_all().await;
            cancelled = true;
        }

        let status = runner.status(&id).await?;
        for entry in status.logs.iter().skip(printed) {
            println!(
                "{} [{:?}] {}",
                entry.time.format("%H:%M:%S"),
                entry.severity,
                entry.message
            );
        }
        printed = status.logs.len();

        match status.status {
            ScrapeStatus::Completed => break,
            ScrapeStatus::Error => {
                return Err(anyhow!(
                    "scraping failed: {}",
                    status.error.unwrap_or_default()
                ))
            }
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }

    if let Some(files) = runner.files(&id).await? {
        println!("{}", serde_json::to_string_pretty(&files)?);
    }

    Ok(())
}
