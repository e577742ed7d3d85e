//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, RenderContext, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Launch options for [`ChromiumRenderer`].
#[derive(Debug, Clone, Default)]
pub struct ChromiumOptions {
    /// Explicit browser executable. Looked up when absent.
    pub executable: Option<PathBuf>,
    /// User agent override.
    pub user_agent: Option<String>,
}

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. Explicit path from config
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // 2. CHAIN_SOLVER_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("CHAIN_SOLVER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. System PATH
    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch(options: &ChromiumOptions) -> Result<Self> {
        let chrome_path = find_chromium(options.executable.as_deref())
            .context("Chromium not found; set CHAIN_SOLVER_CHROMIUM_PATH")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--ignore-certificate-errors");
        if let Some(ua) = &options.user_agent {
            let ua_arg = format!("--user-agent={ua}");
            builder = builder.arg(ua_arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // The handler stream ends when the CDP connection drops.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error: {e}");
                }
            }
            tracing::debug!("CDP handler finished");
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
            closed: false,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::debug!("browser close failed: {e}");
        }
        let _ = browser.wait().await;
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    fn is_connected(&self) -> bool {
        !self.handler_task.is_finished()
    }
}

impl Drop for ChromiumRenderer {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// A single Chromium page context.
///
/// Dropping an unclosed context (e.g. when a caller's timeout cancels the
/// fetch) still closes the tab in the background.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.clone().close().await;
        Ok(())
    }
}

impl Drop for ChromiumContext {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let page = self.page.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_and_read() {
        let renderer = ChromiumRenderer::launch(&ChromiumOptions::default())
            .await
            .expect("failed to create renderer");
        assert!(renderer.is_connected());

        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<h1>Hello</h1><p>What is 2+2?</p>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        let text = ctx
            .execute_js("document.body.innerText")
            .await
            .expect("JS execution failed");
        assert!(text.as_str().unwrap().contains("What is 2+2?"));

        let html = ctx.get_html().await.expect("get_html failed");
        assert!(html.contains("<h1>Hello</h1>"));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.expect("shutdown failed");
    }

    #[test]
    fn explicit_existing_path_wins() {
        let exe = std::env::current_exe().unwrap();
        assert_eq!(find_chromium(Some(exe.as_path())), Some(exe));
    }

    #[test]
    fn explicit_missing_path_is_skipped() {
        let bogus = Path::new("/definitely/not/a/chrome");
        assert_ne!(find_chromium(Some(bogus)).as_deref(), Some(bogus));
    }
}
