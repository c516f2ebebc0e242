use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};

use crate::{
    driver::PageTab,
    types::{AdMarkers, ClickableImage, Image, Link, PageSnapshot},
    utils::{is_network_url, resolve_href},
};

pub const NO_LINK_TEXT: &str = "(no text)";
pub const NO_ALT: &str = "no-alt";

lazy_static! {
    static ref TITLE: Selector = selector("title");
    static ref H1: Selector = selector("h1");
    static ref SECTIONS: Selector = selector("h2, h3");
    static ref LINKS: Selector = selector("a[href]");
    static ref IMAGES: Selector = selector("img");
    static ref IFRAMES: Selector = selector("iframe[id]");
    static ref AD_SLOTS: Selector = selector("ins.adsbygoogle");
    /// Substrings of iframe ids injected by ad networks.
    static ref AD_IFRAME_MARKERS: Vec<&'static str> = vec!["google_ads", "aswift"];
    static ref CONTACT_KEYWORDS: Vec<&'static str> = vec!["contact", "about"];
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).unwrap_or_else(|e| panic!("invalid built-in selector {}: {:?}", s, e))
}

/// Visible text of an element with whitespace runs collapsed.
fn text_of(el: &ElementRef) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Reads the tab's current DOM and derives its snapshot.
pub async fn extract_page_data(tab: &dyn PageTab) -> Result<PageSnapshot> {
    let html = tab.content().await.context("could not read page markup")?;
    let url = tab.url().await.context("could not read page url")?;
    Ok(snapshot_from_html(&html, &url))
}

pub fn snapshot_from_html(html: &str, page_url: &str) -> PageSnapshot {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE)
        .next()
        .map(|t| text_of(&t))
        .unwrap_or_default();
    let heading = doc
        .select(&H1)
        .next()
        .map(|h| text_of(&h))
        .unwrap_or_default();
    let sections = doc.select(&SECTIONS).map(|h| text_of(&h)).collect();

    let links = doc
        .select(&LINKS)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') {
                return None;
            }
            let text = text_of(&a);
            Some(Link {
                text: if text.is_empty() {
                    NO_LINK_TEXT.into()
                } else {
                    text
                },
                url: resolve_href(page_url, href).unwrap_or_else(|| href.to_string()),
            })
        })
        .collect();

    let images = doc
        .select(&IMAGES)
        .map(|img| Image {
            src: img_src(&img, page_url),
            alt: img.value().attr("alt").unwrap_or_default().to_string(),
        })
        .collect();

    let iframe_count = doc
        .select(&IFRAMES)
        .filter(|f| {
            let id = f.value().attr("id").unwrap_or_default();
            AD_IFRAME_MARKERS.iter().any(|m| id.contains(m))
        })
        .count();
    let ad_slot_count = doc.select(&AD_SLOTS).count();

    PageSnapshot {
        title,
        url: page_url.into(),
        heading,
        sections,
        links,
        images,
        ad_markers: AdMarkers {
            iframe_count,
            ad_slot_count,
        },
    }
}

fn img_src(img: &ElementRef, page_url: &str) -> String {
    match img.value().attr("src").map(str::trim) {
        Some(src) if !src.is_empty() => {
            resolve_href(page_url, src).unwrap_or_else(|| src.to_string())
        }
        _ => String::new(),
    }
}

/// Images whose nearest enclosing anchor points to another document, in
/// document order, at most `max`.
pub fn find_clickable_images(html: &str, page_url: &str, max: usize) -> Vec<ClickableImage> {
    let doc = Html::parse_document(html);
    let mut found = vec![];

    for (index, img) in doc.select(&IMAGES).enumerate() {
        if found.len() >= max {
            break;
        }
        let anchor = img
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "a");
        let href = match anchor.and_then(|a| a.value().attr("href")) {
            Some(h) => h.trim(),
            None => continue,
        };
        let link_href = match resolve_href(page_url, href) {
            Some(u) if !u.contains('#') && is_network_url(&u) => u,
            _ => continue,
        };
        let alt = img.value().attr("alt").unwrap_or_default().trim();
        found.push(ClickableImage {
            index,
            src: img_src(&img, page_url),
            alt: if alt.is_empty() {
                NO_ALT.into()
            } else {
                alt.into()
            },
            link_href,
        });
    }
    found
}

/// First anchor whose text or target mentions a contact/about page.
pub fn find_contact_link(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&LINKS).find_map(|a| {
        let href = resolve_href(page_url, a.value().attr("href")?.trim())?;
        if !is_network_url(&href) {
            return None;
        }
        let text = text_of(&a).to_lowercase();
        let lowered = href.to_lowercase();
        CONTACT_KEYWORDS
            .iter()
            .any(|k| text.contains(k) || lowered.contains(k))
            .then_some(href)
    })
}
