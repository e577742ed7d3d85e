//! Core data types for a chain-solving session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::extract::decode_hidden_payload;
use crate::oracle::Answer;

/// One dispatch: who is solving, with which secret, from where, until when.
///
/// Owned by exactly one controller run and dropped when the loop terminates.
pub struct ChainSession {
    pub id: String,
    pub email: String,
    pub secret: String,
    pub start_url: String,
    pub deadline: Instant,
}

impl ChainSession {
    /// Create a session whose deadline is `budget` from now.
    pub fn new(
        email: impl Into<String>,
        secret: impl Into<String>,
        start_url: impl Into<String>,
        budget: Duration,
    ) -> Self {
        Self::with_deadline(email, secret, start_url, Instant::now() + budget)
    }

    pub fn with_deadline(
        email: impl Into<String>,
        secret: impl Into<String>,
        start_url: impl Into<String>,
        deadline: Instant,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            email: email.into(),
            secret: secret.into(),
            start_url: start_url.into().trim().to_string(),
            deadline,
        }
    }

    /// Time left before the deadline (zero once it has passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Deadline for an operation that should take at most `limit`,
    /// clamped to the session deadline.
    pub fn bound(&self, limit: Duration) -> Instant {
        (Instant::now() + limit).min(self.deadline)
    }
}

impl fmt::Debug for ChainSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSession")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .field("start_url", &self.start_url)
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// A fetched page. Immutable once built; replaced every iteration.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    /// Raw markup.
    pub html: String,
    /// Rendered (or tag-stripped) plain text.
    pub text: String,
    /// Decoded hidden payload, when the page carries one.
    pub hidden: Option<String>,
}

impl PageSnapshot {
    /// Build a snapshot, decoding any hidden payload found in the text
    /// (or, failing that, in the markup).
    pub fn new(url: impl Into<String>, html: impl Into<String>, text: impl Into<String>) -> Self {
        let html = html.into();
        let text = text.into();
        let hidden = decode_hidden_payload(&text).or_else(|| decode_hidden_payload(&html));
        Self {
            url: url.into(),
            html,
            text,
            hidden,
        }
    }

    /// Text used for question and endpoint extraction. The decoded payload
    /// supersedes the rendered text.
    pub fn effective_text(&self) -> &str {
        self.hidden.as_deref().unwrap_or(&self.text)
    }

    /// Document content handed to the oracle.
    pub fn context(&self) -> String {
        match &self.hidden {
            Some(decoded) => format!("Decoded hidden content:\n{decoded}\n\nPage HTML:\n{}", self.html),
            None => self.html.clone(),
        }
    }
}

/// Question and submission endpoint derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub question: String,
    pub submit_url: String,
}

/// One answer produced for a task and the verdict it received.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerAttempt {
    pub question: String,
    /// 0 for the first try, 1 for the retry.
    pub attempt: u8,
    /// Size of the context handed to the oracle, in bytes.
    pub context_bytes: usize,
    pub answer: Answer,
    pub verdict: SubmissionVerdict,
}

/// The submission endpoint's judgment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionVerdict {
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SubmissionVerdict {
    /// A normalized rejection (network failure, non-2xx, malformed body).
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            correct: false,
            url: None,
            reason: Some(reason.into()),
        }
    }

    /// The next URL, if present and non-empty.
    pub fn next_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// Terminal failure kinds for a chain run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainError {
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("no submission endpoint found on {url}")]
    NoSubmissionEndpoint { url: String },

    #[error("answer rejected ({}), retried: {retried}", reason.as_deref().unwrap_or("no reason given"))]
    WrongAnswer {
        reason: Option<String>,
        retried: bool,
    },

    #[error("step limit of {max_steps} reached")]
    StepLimit { max_steps: usize },
}

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// A correct verdict without a next URL.
    Completed,
    Failed { error: ChainError },
    /// The deadline passed before the chain finished.
    TimedOut,
}

impl ChainOutcome {
    pub fn failed(error: ChainError) -> Self {
        Self::Failed { error }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Everything that happened on one page.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub url: String,
    pub question: String,
    pub submit_url: String,
    pub attempts: Vec<AnswerAttempt>,
}

impl StepRecord {
    pub fn new(url: &str, task: &ExtractedTask) -> Self {
        Self {
            url: url.to_string(),
            question: task.question.clone(),
            submit_url: task.submit_url.clone(),
            attempts: Vec::new(),
        }
    }

    pub fn retries(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    /// Verdict of the last attempt on this page.
    pub fn verdict(&self) -> Option<&SubmissionVerdict> {
        self.attempts.last().map(|a| &a.verdict)
    }
}

/// Summary of a finished run. Only ever logged or printed; never sent back
/// to the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub session_id: String,
    pub outcome: ChainOutcome,
    pub steps: Vec<StepRecord>,
    pub elapsed_ms: u64,
}

impl ChainReport {
    /// URLs fetched successfully, in order.
    pub fn visited(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.url.as_str()).collect()
    }
}
