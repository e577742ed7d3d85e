//! Command-line overrides and secret resolution.

use std::path::PathBuf;
use std::time::Duration;

use chain_solver::{FetchBackend, SolverConfig};

use crate::error::ServerError;

const SECRET_ENV: &str = "CHAIN_SOLVER_SECRET";

/// Resolve the dispatch secret: CLI flag > env var.
pub fn resolve_secret(explicit: Option<String>) -> Result<String, ServerError> {
    explicit
        .or_else(|| std::env::var(SECRET_ENV).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ServerError::MissingSecret)
}

/// Solver settings that can be overridden per invocation.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SolverArgs {
    /// Page fetch backend (browser, http).
    #[arg(long)]
    pub backend: Option<FetchBackend>,

    /// Wall-clock budget per chain, in seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Minimum time left, in seconds, for a wrong answer to be retried.
    #[arg(long)]
    pub retry_slack_secs: Option<u64>,

    /// Chromium executable for the browser backend.
    #[arg(long)]
    pub chromium_path: Option<PathBuf>,
}

impl SolverArgs {
    /// Layer these overrides on top of `config`.
    pub fn apply(self, mut config: SolverConfig) -> SolverConfig {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(secs) = self.deadline_secs {
            config.deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = self.retry_slack_secs {
            config.retry_slack = Duration::from_secs(secs);
        }
        if self.chromium_path.is_some() {
            config.chromium_path = self.chromium_path;
        }
        config
    }
}
