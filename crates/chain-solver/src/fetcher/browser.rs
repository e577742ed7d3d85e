//! Browser-backed page fetcher.

use super::PageFetcher;
use crate::renderer::{RenderContext, Renderer};
use crate::types::PageSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const OUTER_HTML_JS: &str = "document.documentElement.outerHTML";
const INNER_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// Loads pages in a fresh browser tab and reads back markup and rendered text.
pub struct BrowserFetcher {
    renderer: Arc<dyn Renderer>,
}

impl BrowserFetcher {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageSnapshot> {
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .context("failed to open browser context")?;

        let result = read_page(ctx.as_mut(), url, timeout).await;

        // Released on every path, including navigation and script failures.
        if let Err(e) = ctx.close().await {
            warn!("failed to close browser context: {e}");
        }

        result
    }

    fn name(&self) -> &'static str {
        "browser"
    }

    async fn shutdown(&self) -> Result<()> {
        self.renderer.shutdown().await
    }
}

async fn read_page(ctx: &mut dyn RenderContext, url: &str, timeout: Duration) -> Result<PageSnapshot> {
    let nav = ctx.navigate(url, timeout).await?;
    debug!(url, final_url = %nav.final_url, load_ms = nav.load_time_ms, "page loaded");

    let html = match ctx.execute_js(OUTER_HTML_JS).await? {
        serde_json::Value::String(s) => s,
        _ => ctx.get_html().await?,
    };
    let text = ctx
        .execute_js(INNER_TEXT_JS)
        .await?
        .as_str()
        .unwrap_or_default()
        .to_string();

    Ok(PageSnapshot::new(url, html, text))
}
