//! Answer oracle: question + page context in, candidate answer out.
//!
//! Backends implement [`Oracle`] and return raw model text. [`solicit`]
//! bounds the call, cleans the text with [`normalize_answer`], and turns any
//! failure into [`Answer::Unavailable`] so nothing escapes to the controller.

pub mod normalize;
pub mod openai;

pub use normalize::normalize_answer;
pub use openai::OpenAiOracle;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Submitted in place of an answer when the oracle could not produce one.
pub const ORACLE_FAILURE_SENTINEL: &str = "ORACLE_UNAVAILABLE";

/// Annotation attached to the single retry after a wrong answer.
#[derive(Debug, Clone)]
pub struct RetryHint {
    pub previous_answer: String,
    pub reason: Option<String>,
}

/// Everything the oracle sees for one attempt.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    /// Document content. Backends truncate it; callers need not.
    pub context: String,
    pub retry: Option<RetryHint>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: context.into(),
            retry: None,
        }
    }

    pub fn with_retry(mut self, hint: RetryHint) -> Self {
        self.retry = Some(hint);
        self
    }
}

/// A text-generation backend.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Raw model output for `request`.
    async fn solicit(&self, request: &AnswerRequest) -> Result<String>;

    fn name(&self) -> &'static str {
        "oracle"
    }
}

/// A cleaned oracle answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// Parsed JSON literal, or the cleaned string.
    Value(serde_json::Value),
    /// The oracle failed; the sentinel is submitted instead.
    Unavailable { reason: String },
}

impl Answer {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Value(serde_json::Value::String(s.into()))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// The value placed in the submission's `answer` field.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Unavailable { .. } => serde_json::Value::String(ORACLE_FAILURE_SENTINEL.into()),
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(serde_json::Value::String(s)) => f.write_str(s),
            Self::Value(v) => write!(f, "{v}"),
            Self::Unavailable { .. } => f.write_str(ORACLE_FAILURE_SENTINEL),
        }
    }
}

/// Ask `oracle`, giving up at `deadline`. Never fails: errors, timeouts and
/// empty output all become [`Answer::Unavailable`].
pub async fn solicit(oracle: &dyn Oracle, request: &AnswerRequest, deadline: Instant) -> Answer {
    let raw = match tokio::time::timeout_at(deadline, oracle.solicit(request)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!(oracle = oracle.name(), "oracle call failed: {e:#}");
            return Answer::unavailable(format!("{e:#}"));
        }
        Err(_) => {
            warn!(oracle = oracle.name(), "oracle call timed out");
            return Answer::unavailable("timed out");
        }
    };

    let answer = normalize_answer(&raw);
    debug!(raw = %raw, answer = %answer, "oracle answered");
    answer
}
