//! Shared, lazily launched render backend.
//!
//! One browser process serves every session in the process. It is launched
//! on the first context request, reused while it reports itself connected,
//! relaunched when it does not, and released on `shutdown`.

use super::{ChromiumOptions, ChromiumRenderer, RenderContext, Renderer};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

type LaunchFn = dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Renderer>>> + Send + Sync;

/// A [`Renderer`] that owns at most one underlying engine and creates it on demand.
pub struct LazyRenderer {
    launch: Box<LaunchFn>,
    current: Mutex<Option<Arc<dyn Renderer>>>,
    launches: AtomicUsize,
}

impl LazyRenderer {
    /// Build from an arbitrary launcher.
    pub fn new<F, Fut>(launch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn Renderer>>> + Send + 'static,
    {
        Self {
            launch: Box::new(move || Box::pin(launch())),
            current: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Lazily launched headless Chromium.
    pub fn chromium(options: ChromiumOptions) -> Self {
        Self::new(move || {
            let options = options.clone();
            async move {
                let renderer = ChromiumRenderer::launch(&options).await?;
                Ok(Arc::new(renderer) as Arc<dyn Renderer>)
            }
        })
    }

    /// Return the live engine, launching or relaunching it if needed.
    pub async fn acquire(&self) -> Result<Arc<dyn Renderer>> {
        let mut slot = self.current.lock().await;

        if let Some(renderer) = slot.as_ref() {
            if renderer.is_connected() {
                return Ok(Arc::clone(renderer));
            }
            warn!("render backend disconnected, relaunching");
            if let Some(stale) = slot.take() {
                if let Err(e) = stale.shutdown().await {
                    warn!("failed to shut down stale render backend: {e}");
                }
            }
        }

        let renderer = (self.launch)().await?;
        let n = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
        info!("render backend launched (launch #{n})");
        *slot = Some(Arc::clone(&renderer));
        Ok(renderer)
    }

    /// How many times an engine has been launched.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Renderer for LazyRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let renderer = self.acquire().await?;
        renderer.new_context().await
    }

    async fn shutdown(&self) -> Result<()> {
        let current = self.current.lock().await.take();
        match current {
            Some(renderer) => {
                info!("shutting down render backend");
                renderer.shutdown().await
            }
            None => Ok(()),
        }
    }

    fn active_contexts(&self) -> usize {
        self.current
            .try_lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|r| r.active_contexts()))
            .unwrap_or(0)
    }
}
