//! Page fetching: turn a URL into a [`PageSnapshot`].
//!
//! Two backends: a full browser (script-generated content included) and a
//! plain HTTP GET with tag stripping.

pub mod browser;
pub mod http;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

use crate::config::ConfigError;
use crate::types::PageSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Retrieves a page's markup and plain text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, failing if it cannot be loaded within `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageSnapshot>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Release any process-wide resources held by the backend.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Which fetcher backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchBackend {
    #[default]
    Browser,
    Http,
}

impl fmt::Display for FetchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Browser => "browser",
            Self::Http => "http",
        };
        f.write_str(s)
    }
}

impl FromStr for FetchBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "chromium" => Ok(Self::Browser),
            "http" | "plain" => Ok(Self::Http),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}
