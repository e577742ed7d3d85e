//! The chain loop: fetch, extract, solicit, submit, follow.
//!
//! One session runs strictly sequentially. Every blocking call is bounded by
//! both its own timeout and the session deadline, and every failure is
//! reduced to a [`ChainOutcome`] in the returned report.

use crate::config::{ConfigError, OracleConfig, SolverConfig};
use crate::extract::Extractor;
use crate::fetcher::{BrowserFetcher, FetchBackend, HttpFetcher, PageFetcher};
use crate::oracle::{self, Answer, AnswerRequest, OpenAiOracle, Oracle, RetryHint};
use crate::renderer::{ChromiumOptions, LazyRenderer};
use crate::submit::{SubmissionClient, SubmissionPayload};
use crate::types::{
    AnswerAttempt, ChainError, ChainOutcome, ChainReport, ChainSession, ExtractedTask,
    StepRecord, SubmissionVerdict,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// What to do after a page's final verdict.
enum Transition {
    Follow(String),
    Done(ChainOutcome),
}

/// Drives chain sessions against a fetcher and an oracle.
pub struct ChainController {
    fetcher: Arc<dyn PageFetcher>,
    oracle: Arc<dyn Oracle>,
    submitter: SubmissionClient,
    extractor: Extractor,
    config: SolverConfig,
}

impl ChainController {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        oracle: Arc<dyn Oracle>,
        config: SolverConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            extractor: Extractor::new(&config.extractor)?,
            submitter: SubmissionClient::new(&config.user_agent),
            fetcher,
            oracle,
            config,
        })
    }

    /// Build the fetcher backend and the OpenAI oracle from configuration.
    pub fn from_config(config: SolverConfig, oracle_config: OracleConfig) -> anyhow::Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = match config.backend {
            FetchBackend::Browser => {
                let renderer = LazyRenderer::chromium(ChromiumOptions {
                    executable: config.chromium_path.clone(),
                    user_agent: Some(config.user_agent.clone()),
                });
                Arc::new(BrowserFetcher::new(Arc::new(renderer)))
            }
            FetchBackend::Http => Arc::new(HttpFetcher::new(&config.user_agent)?),
        };
        let oracle = Arc::new(OpenAiOracle::new(oracle_config)?);
        Ok(Self::new(fetcher, oracle, config)?)
    }

    /// A session starting now with the configured deadline budget.
    pub fn session(
        &self,
        email: impl Into<String>,
        secret: impl Into<String>,
        start_url: impl Into<String>,
    ) -> ChainSession {
        ChainSession::new(email, secret, start_url, self.config.deadline)
    }

    /// Run `session` on its own task. The handle may be dropped.
    pub fn spawn(self: &Arc<Self>, session: ChainSession) -> JoinHandle<ChainReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(session).await })
    }

    /// Release the fetcher's shared resources.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.fetcher.shutdown().await
    }

    /// Run a session to completion.
    pub async fn run(&self, session: ChainSession) -> ChainReport {
        let span = info_span!("chain", session = %session.id, email = %session.email);
        self.run_session(session).instrument(span).await
    }

    async fn run_session(&self, session: ChainSession) -> ChainReport {
        let started = Instant::now();
        info!(
            url = %session.start_url,
            backend = self.fetcher.name(),
            budget_ms = session.remaining().as_millis() as u64,
            "chain started"
        );

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current = session.start_url.clone();

        let outcome = loop {
            if session.is_expired() {
                break ChainOutcome::TimedOut;
            }
            if steps.len() >= self.config.max_steps {
                break ChainOutcome::failed(ChainError::StepLimit {
                    max_steps: self.config.max_steps,
                });
            }

            info!(step = steps.len() + 1, url = %current, "fetching");
            let snapshot = {
                let limit = self.config.navigation_timeout.min(session.remaining());
                let fetch = self.fetcher.fetch(&current, limit);
                match tokio::time::timeout_at(session.bound(limit), fetch).await {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(e)) if session.is_expired() => {
                        warn!("fetch failed at the deadline: {e:#}");
                        break ChainOutcome::TimedOut;
                    }
                    Ok(Err(e)) => {
                        break ChainOutcome::failed(ChainError::Fetch {
                            url: current.clone(),
                            message: format!("{e:#}"),
                        });
                    }
                    Err(_) if session.is_expired() => break ChainOutcome::TimedOut,
                    Err(_) => {
                        break ChainOutcome::failed(ChainError::Fetch {
                            url: current.clone(),
                            message: format!("timed out after {}ms", limit.as_millis()),
                        });
                    }
                }
            };

            let Some(task) = self.extractor.extract(&snapshot) else {
                warn!(url = %current, "no submission endpoint on page");
                break ChainOutcome::failed(ChainError::NoSubmissionEndpoint { url: current });
            };
            info!(question = %task.question, submit_url = %task.submit_url, "task extracted");

            let mut step = StepRecord::new(&current, &task);
            let transition = self
                .solve_page(&session, &current, &task, snapshot.context(), &mut step)
                .await;
            if let Some(verdict) = step.verdict() {
                debug!(
                    attempts = step.attempts.len(),
                    correct = verdict.correct,
                    reason = ?verdict.reason,
                    "step settled"
                );
            }
            steps.push(step);

            match transition {
                Transition::Follow(next) => {
                    info!(next = %next, "correct, following");
                    current = next;
                }
                Transition::Done(outcome) => break outcome,
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            ChainOutcome::Completed => info!(steps = steps.len(), elapsed_ms, "chain completed"),
            ChainOutcome::TimedOut => warn!(steps = steps.len(), elapsed_ms, "chain timed out"),
            ChainOutcome::Failed { error } => {
                warn!(steps = steps.len(), elapsed_ms, "chain failed: {error}")
            }
        }

        ChainReport {
            session_id: session.id.clone(),
            outcome,
            steps,
            elapsed_ms,
        }
    }

    /// Answer one page: first attempt, then at most one retry if time allows.
    async fn solve_page(
        &self,
        session: &ChainSession,
        page_url: &str,
        task: &ExtractedTask,
        context: String,
        step: &mut StepRecord,
    ) -> Transition {
        let request = AnswerRequest::new(task.question.clone(), context);
        let (answer, verdict) = self.attempt(session, page_url, task, &request, 0, step).await;
        if verdict.correct {
            return follow(page_url, &verdict);
        }

        warn!(answer = %answer, reason = ?verdict.reason, "wrong answer");
        let remaining = session.remaining();
        if remaining < self.config.retry_slack {
            if session.is_expired() {
                return Transition::Done(ChainOutcome::TimedOut);
            }
            info!(
                remaining_ms = remaining.as_millis() as u64,
                "not enough time left to retry"
            );
            return Transition::Done(ChainOutcome::failed(ChainError::WrongAnswer {
                reason: verdict.reason,
                retried: false,
            }));
        }

        info!("retrying once");
        let retry = request.with_retry(RetryHint {
            previous_answer: answer.to_string(),
            reason: verdict.reason.clone(),
        });
        let (_, verdict) = self.attempt(session, page_url, task, &retry, 1, step).await;
        if verdict.correct {
            return follow(page_url, &verdict);
        }
        if session.is_expired() {
            return Transition::Done(ChainOutcome::TimedOut);
        }
        Transition::Done(ChainOutcome::failed(ChainError::WrongAnswer {
            reason: verdict.reason,
            retried: true,
        }))
    }

    async fn attempt(
        &self,
        session: &ChainSession,
        page_url: &str,
        task: &ExtractedTask,
        request: &AnswerRequest,
        attempt: u8,
        step: &mut StepRecord,
    ) -> (Answer, SubmissionVerdict) {
        let answer = oracle::solicit(
            self.oracle.as_ref(),
            request,
            session.bound(self.config.oracle_timeout),
        )
        .await;

        let payload = SubmissionPayload {
            email: &session.email,
            secret: &session.secret,
            url: page_url,
            answer: answer.to_payload(),
        };
        let verdict = self
            .submitter
            .submit(
                &task.submit_url,
                &payload,
                session.bound(self.config.submit_timeout),
            )
            .await;
        info!(attempt, answer = %answer, correct = verdict.correct, "submitted");

        step.attempts.push(AnswerAttempt {
            question: request.question.clone(),
            attempt,
            context_bytes: request.context.len(),
            answer: answer.clone(),
            verdict: verdict.clone(),
        });
        (answer, verdict)
    }
}

/// A correct verdict either names the next page or ends the chain.
fn follow(page_url: &str, verdict: &SubmissionVerdict) -> Transition {
    match verdict.next_url() {
        Some(next) => Transition::Follow(resolve_next_url(page_url, next)),
        None => Transition::Done(ChainOutcome::Completed),
    }
}

/// Resolve a possibly relative next URL against the current page.
fn resolve_next_url(current: &str, next: &str) -> String {
    url::Url::parse(current)
        .and_then(|base| base.join(next))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| next.to_string())
}
