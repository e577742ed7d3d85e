//! Submission client: post an answer, read back the verdict.
//!
//! Never returns an error. Network failures, non-2xx statuses and malformed
//! bodies are all reduced to a rejected verdict.

use crate::types::SubmissionVerdict;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Body posted to a submission endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionPayload<'a> {
    pub email: &'a str,
    pub secret: &'a str,
    /// The page the answer belongs to.
    pub url: &'a str,
    pub answer: serde_json::Value,
}

#[derive(Clone)]
pub struct SubmissionClient {
    client: reqwest::Client,
}

impl SubmissionClient {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Post `payload` to `endpoint`, giving up at `deadline`.
    pub async fn submit(
        &self,
        endpoint: &str,
        payload: &SubmissionPayload<'_>,
        deadline: Instant,
    ) -> SubmissionVerdict {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return SubmissionVerdict::rejected("no time left to submit");
        }

        let response = match self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(endpoint, "submission failed: {e}");
                return SubmissionVerdict::rejected(format!("submission failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, %status, "submission endpoint rejected the request");
            return SubmissionVerdict::rejected(format!("submission endpoint returned {status}"));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(endpoint, "failed to read submission response: {e}");
                return SubmissionVerdict::rejected(format!("unreadable response: {e}"));
            }
        };

        match serde_json::from_str::<SubmissionVerdict>(&body) {
            Ok(verdict) => {
                debug!(endpoint, correct = verdict.correct, next = ?verdict.next_url(), "verdict");
                verdict
            }
            Err(e) => {
                warn!(endpoint, "malformed verdict: {e}");
                SubmissionVerdict::rejected(format!("malformed verdict: {e}"))
            }
        }
    }
}
