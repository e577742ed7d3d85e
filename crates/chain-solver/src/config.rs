//! Solver configuration: defaults, environment overrides, validation.
//!
//! Every knob has a compiled-in default. `from_env` layers `CHAIN_SOLVER_*`
//! (and the usual `OPENAI_*`) variables on top; unparsable values are logged
//! and ignored rather than failing startup.

use crate::fetcher::FetchBackend;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DEADLINE_SECS: u64 = 170;
const DEFAULT_RETRY_SLACK_SECS: u64 = 30;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_STEPS: usize = 100;

const DEFAULT_MIN_QUESTION_LEN: usize = 10;
const DEFAULT_MAX_QUESTION_LEN: usize = 400;
pub const DEFAULT_QUESTION: &str = "What is the answer to this puzzle?";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_MAX_CONTEXT_CHARS: usize = 28_000;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Configuration problems detected while building solver components.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown fetch backend '{0}' (expected 'browser' or 'http')")]
    UnknownBackend(String),

    #[error("invalid question bounds: min {min}, max {max}")]
    InvalidQuestionBounds { min: usize, max: usize },

    #[error("oracle API key missing (set OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("invalid pattern: {0}")]
    Pattern(String),
}

/// Question-extraction tunables.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Minimum question length in characters, including the leading capital and `?`.
    pub min_question_len: usize,
    /// Maximum question length in characters.
    pub max_question_len: usize,
    /// Used when no question-shaped substring exists.
    pub default_question: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_question_len: DEFAULT_MIN_QUESTION_LEN,
            max_question_len: DEFAULT_MAX_QUESTION_LEN,
            default_question: DEFAULT_QUESTION.to_string(),
        }
    }
}

/// Chain controller settings.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget for one session.
    pub deadline: Duration,
    /// Minimum time left for a retry to be attempted.
    pub retry_slack: Duration,
    pub navigation_timeout: Duration,
    pub oracle_timeout: Duration,
    pub submit_timeout: Duration,
    pub max_steps: usize,
    pub backend: FetchBackend,
    pub chromium_path: Option<PathBuf>,
    pub user_agent: String,
    pub extractor: ExtractorConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            retry_slack: Duration::from_secs(DEFAULT_RETRY_SLACK_SECS),
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            oracle_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
            max_steps: DEFAULT_MAX_STEPS,
            backend: FetchBackend::default(),
            chromium_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl SolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend = match read_env_string("CHAIN_SOLVER_BACKEND") {
            Some(raw) => raw.parse().unwrap_or_else(|e: ConfigError| {
                tracing::warn!("{e}; using {}", defaults.backend);
                defaults.backend
            }),
            None => defaults.backend,
        };

        Self {
            deadline: read_env_secs("CHAIN_SOLVER_DEADLINE_SECS", defaults.deadline),
            retry_slack: read_env_secs("CHAIN_SOLVER_RETRY_SLACK_SECS", defaults.retry_slack),
            navigation_timeout: read_env_secs(
                "CHAIN_SOLVER_NAVIGATION_TIMEOUT_SECS",
                defaults.navigation_timeout,
            ),
            oracle_timeout: read_env_secs("CHAIN_SOLVER_ORACLE_TIMEOUT_SECS", defaults.oracle_timeout),
            submit_timeout: read_env_secs("CHAIN_SOLVER_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout),
            max_steps: read_env_usize("CHAIN_SOLVER_MAX_STEPS", defaults.max_steps).max(1),
            backend,
            chromium_path: read_env_string("CHAIN_SOLVER_CHROMIUM_PATH").map(PathBuf::from),
            user_agent: read_env_string("CHAIN_SOLVER_USER_AGENT").unwrap_or(defaults.user_agent),
            extractor: ExtractorConfig {
                min_question_len: read_env_usize(
                    "CHAIN_SOLVER_MIN_QUESTION_LEN",
                    defaults.extractor.min_question_len,
                ),
                max_question_len: read_env_usize(
                    "CHAIN_SOLVER_MAX_QUESTION_LEN",
                    defaults.extractor.max_question_len,
                ),
                default_question: read_env_string("CHAIN_SOLVER_DEFAULT_QUESTION")
                    .unwrap_or(defaults.extractor.default_question),
            },
        }
    }
}

/// Settings for the OpenAI-compatible oracle backend.
#[derive(Clone)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Context is truncated to this many bytes (on a char boundary).
    pub max_context_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: read_env_string("OPENAI_API_KEY"),
            api_base: read_env_string("OPENAI_BASE_URL").unwrap_or(defaults.api_base),
            model: read_env_string("OPENAI_MODEL").unwrap_or(defaults.model),
            temperature: read_env_parsed("CHAIN_SOLVER_TEMPERATURE", defaults.temperature),
            max_tokens: read_env_parsed("CHAIN_SOLVER_MAX_TOKENS", defaults.max_tokens),
            max_context_chars: read_env_usize(
                "CHAIN_SOLVER_MAX_CONTEXT_CHARS",
                defaults.max_context_chars,
            ),
        }
    }
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_context_chars", &self.max_context_chars)
            .finish()
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match read_env_string(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {name}={raw}");
            default
        }),
        None => default,
    }
}

fn read_env_usize(name: &str, default: usize) -> usize {
    read_env_parsed(name, default)
}

fn read_env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(read_env_parsed(name, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.deadline, Duration::from_secs(170));
        assert_eq!(cfg.retry_slack, Duration::from_secs(30));
        assert_eq!(cfg.extractor.min_question_len, 10);
        assert_eq!(cfg.extractor.max_question_len, 400);
        assert_eq!(cfg.backend, FetchBackend::Browser);
    }

    #[test]
    fn unparsable_env_value_falls_back() {
        std::env::set_var("CHAIN_SOLVER_TEST_BOGUS_USIZE", "not-a-number");
        assert_eq!(read_env_usize("CHAIN_SOLVER_TEST_BOGUS_USIZE", 7), 7);
        std::env::set_var("CHAIN_SOLVER_TEST_BOGUS_USIZE", " 12 ");
        assert_eq!(read_env_usize("CHAIN_SOLVER_TEST_BOGUS_USIZE", 7), 12);
        std::env::remove_var("CHAIN_SOLVER_TEST_BOGUS_USIZE");
    }

    #[test]
    fn oracle_debug_hides_key() {
        let cfg = OracleConfig {
            api_key: Some("sk-secret".into()),
            ..OracleConfig::default()
        };
        assert!(!format!("{cfg:?}").contains("sk-secret"));
    }
}
