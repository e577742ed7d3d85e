//! Plain-HTTP page fetcher.
//!
//! No script execution: the text is whatever the served markup says once tags
//! are stripped. Enough for pages that put the task in static HTML.

use super::PageFetcher;
use crate::types::PageSnapshot;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 5;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Elements whose text never reaches the reader.
const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template"];

/// Elements that start on a new line when rendered.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Fetches pages with a single GET.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// GET with one retry on 5xx or connection failure.
    async fn get_body(&self, url: &str) -> Result<String> {
        let mut retried = false;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() && !retried {
                        warn!(url, %status, "server error, retrying once");
                        retried = true;
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    if !status.is_success() {
                        bail!("GET {url} returned {status}");
                    }
                    return resp.text().await.context("failed to read response body");
                }
                Err(e) if (e.is_connect() || e.is_request()) && !retried => {
                    warn!(url, "request failed ({e}), retrying once");
                    retried = true;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e).with_context(|| format!("GET {url} failed")),
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageSnapshot> {
        let html = tokio::time::timeout(timeout, self.get_body(url))
            .await
            .map_err(|_| anyhow::anyhow!("GET {url} timed out after {}ms", timeout.as_millis()))??;

        let text = strip_markup(&html);
        debug!(url, html_bytes = html.len(), text_bytes = text.len(), "page fetched");
        Ok(PageSnapshot::new(url, html, text))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Reduce markup to readable text: hidden elements dropped, block elements
/// on their own lines, runs of whitespace collapsed.
pub fn strip_markup(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            // Source whitespace never breaks a line; only block boundaries do.
            Node::Text(text) => out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c })),
            Node::Element(element) => {
                let name = element.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block || name == "br" {
                    out.push('\n');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
