//! End-to-end chain runs against an in-process fetcher and oracle and a
//! mock submission endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chain_solver::{
    encode_hidden_payload, AnswerRequest, ChainController, ChainError, ChainOutcome, ChainSession,
    Oracle, PageFetcher, PageSnapshot, SolverConfig, ORACLE_FAILURE_SENTINEL,
};

// ─────────────────────── helpers ───────────────────────

const START: &str = "http://quiz.test/start";
const STEP2: &str = "http://quiz.test/step2";

/// Serves fixed page texts by URL.
#[derive(Default)]
struct FakeFetcher {
    pages: HashMap<String, String>,
    delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn with_pages(pages: &[(&str, String)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, text)| (url.to_string(), text.clone()))
                .collect(),
            ..Self::default()
        }
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> anyhow::Result<PageSnapshot> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self
            .pages
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))?;
        Ok(PageSnapshot::new(url, format!("<html><body>{text}</body></html>"), text.clone()))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Replies from a script, then "4" forever.
#[derive(Default)]
struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<AnswerRequest>>,
}

impl ScriptedOracle {
    fn replying(replies: &[Result<&str, &str>]) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, i: usize) -> AnswerRequest {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn solicit(&self, request: &AnswerRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok("4".into()),
        }
    }
}

/// Never answers.
struct HangingOracle;

#[async_trait]
impl Oracle for HangingOracle {
    async fn solicit(&self, _request: &AnswerRequest) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".into())
    }
}

fn page(question: &str, server: &MockServer) -> String {
    format!("Step intro. {question} Post your answer to {}/submit as JSON.", server.uri())
}

fn config(deadline_secs: u64, slack_secs: u64) -> SolverConfig {
    SolverConfig {
        deadline: Duration::from_secs(deadline_secs),
        retry_slack: Duration::from_secs(slack_secs),
        ..SolverConfig::default()
    }
}

fn controller(
    fetcher: &Arc<FakeFetcher>,
    oracle: &Arc<ScriptedOracle>,
    config: SolverConfig,
) -> ChainController {
    ChainController::new(fetcher.clone(), oracle.clone(), config).unwrap()
}

fn verdict(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Mount a one-shot verdict. Earlier mounts answer first.
async fn mount_once(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(verdict(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

// ─────────────────────── tests ───────────────────────

#[tokio::test]
async fn follows_next_urls_until_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"url": START, "answer": 4, "email": "a@b.com", "secret": "S"})))
        .respond_with(verdict(json!({"correct": true, "url": STEP2})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"url": STEP2})))
        .respond_with(verdict(json!({"correct": true})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[
        (START, page("What is 2+2?", &server)),
        (STEP2, page("What is 3+1?", &server)),
    ]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    assert_eq!(report.visited(), vec![START, STEP2]);
    assert_eq!(fetcher.fetched(), vec![START, STEP2]);
    assert_eq!(oracle.calls(), 2);
    assert_eq!(oracle.request(0).question, "What is 2+2?");
    assert_eq!(oracle.request(1).question, "What is 3+1?");
    assert!(report.steps.iter().all(|s| s.retries() == 0));
}

#[tokio::test]
async fn missing_endpoint_stops_without_consulting_oracle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": true})))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(
        START,
        "What is 2+2? There is nowhere to send it.".to_string(),
    )]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(
        report.outcome,
        ChainOutcome::failed(ChainError::NoSubmissionEndpoint { url: START.into() })
    );
    assert_eq!(oracle.calls(), 0);
    assert!(report.steps.is_empty());
}

#[tokio::test]
async fn wrong_answer_is_retried_once_and_chain_continues() {
    let server = MockServer::start().await;
    mount_once(&server, json!({"correct": false, "reason": "format"})).await;
    mount_once(&server, json!({"correct": true, "url": STEP2})).await;
    mount_once(&server, json!({"correct": true})).await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[
        (START, page("What is 2+2?", &server)),
        (STEP2, page("What is the final step?", &server)),
    ]));
    let oracle = Arc::new(ScriptedOracle::replying(&[Ok("5"), Ok("4")]));
    let ctl = controller(&fetcher, &oracle, config(120, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    assert_eq!(fetcher.fetched(), vec![START, STEP2]);
    assert_eq!(report.steps[0].retries(), 1);
    assert_eq!(report.steps[1].retries(), 0);

    let retry = oracle.request(1).retry.expect("second call carries a retry hint");
    assert_eq!(retry.previous_answer, "5");
    assert_eq!(retry.reason.as_deref(), Some("format"));
    assert_eq!(oracle.request(1).question, "What is 2+2?");
}

#[tokio::test]
async fn no_retry_without_enough_slack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": false, "reason": "format"})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::default());
    // 10s budget, 30s needed for a retry.
    let ctl = controller(&fetcher, &oracle, config(10, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(
        report.outcome,
        ChainOutcome::failed(ChainError::WrongAnswer {
            reason: Some("format".into()),
            retried: false,
        })
    );
    assert_eq!(oracle.calls(), 1);
    assert_eq!(report.steps[0].retries(), 0);
}

#[tokio::test]
async fn second_wrong_answer_ends_the_chain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": false, "reason": "nope"})))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(120, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(
        report.outcome,
        ChainOutcome::failed(ChainError::WrongAnswer {
            reason: Some("nope".into()),
            retried: true,
        })
    );
    assert_eq!(oracle.calls(), 2);
    assert_eq!(fetcher.fetched(), vec![START]);
}

#[tokio::test]
async fn submission_failure_counts_as_wrong_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(10, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert!(matches!(
        report.outcome,
        ChainOutcome::Failed {
            error: ChainError::WrongAnswer { retried: false, .. }
        }
    ));
}

#[tokio::test]
async fn oracle_failure_submits_sentinel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"answer": ORACLE_FAILURE_SENTINEL})))
        .respond_with(verdict(json!({"correct": true})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::replying(&[Err("model overloaded")]));
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    assert!(report.steps[0].attempts[0].answer.is_unavailable());
}

#[tokio::test]
async fn expired_session_never_fetches() {
    let fetcher = Arc::new(FakeFetcher::default());
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let session = ChainSession::with_deadline("a@b.com", "S", START, Instant::now());
    let report = ctl.run(session).await;

    assert_eq!(report.outcome, ChainOutcome::TimedOut);
    assert!(fetcher.fetched().is_empty());
}

#[tokio::test]
async fn slow_fetch_is_cut_off_at_the_deadline() {
    let server = MockServer::start().await;
    let fetcher = Arc::new(FakeFetcher {
        delay: Some(Duration::from_secs(30)),
        ..FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))])
    });
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let started = std::time::Instant::now();
    let session = ChainSession::new("a@b.com", "S", START, Duration::from_millis(300));
    let report = ctl.run(session).await;

    assert_eq!(report.outcome, ChainOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn hanging_oracle_is_cut_off_at_the_deadline() {
    let server = MockServer::start().await;
    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let ctl = ChainController::new(fetcher.clone(), Arc::new(HangingOracle), config(60, 30)).unwrap();

    let started = std::time::Instant::now();
    let session = ChainSession::new("a@b.com", "S", START, Duration::from_millis(300));
    let report = ctl.run(session).await;
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, ChainOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(fetcher.fetched(), vec![START]);
    assert_eq!(report.steps[0].attempts.len(), 1);
    assert!(report.steps[0].attempts[0].answer.is_unavailable());
}

#[tokio::test]
async fn retry_happens_when_remaining_time_covers_the_slack() {
    let server = MockServer::start().await;
    mount_once(&server, json!({"correct": false, "reason": "off by one"})).await;
    mount_once(&server, json!({"correct": true})).await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::replying(&[Ok("5"), Ok("4")]));
    // Scaled down from 40s left against a 30s slack.
    let ctl = controller(
        &fetcher,
        &oracle,
        SolverConfig {
            deadline: Duration::from_millis(4000),
            retry_slack: Duration::from_millis(3000),
            ..SolverConfig::default()
        },
    );

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    assert_eq!(oracle.calls(), 2);
    assert_eq!(report.steps[0].retries(), 1);
    assert!(report.steps[0].verdict().is_some_and(|v| v.correct));
}

#[tokio::test]
async fn fetch_error_is_terminal() {
    let fetcher = Arc::new(FakeFetcher::default());
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    match report.outcome {
        ChainOutcome::Failed {
            error: ChainError::Fetch { url, message },
        } => {
            assert_eq!(url, START);
            assert!(message.contains("404"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(fetcher.fetched(), vec![START]);
}

#[tokio::test]
async fn relative_next_url_is_resolved_against_current_page() {
    let server = MockServer::start().await;
    mount_once(&server, json!({"correct": true, "url": "/step2"})).await;
    mount_once(&server, json!({"correct": true, "url": ""})).await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[
        (START, page("What is 2+2?", &server)),
        (STEP2, page("What is 3+1?", &server)),
    ]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    assert_eq!(fetcher.fetched(), vec![START, STEP2]);
}

#[tokio::test]
async fn looping_chain_hits_step_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": true, "url": START})))
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(
        &fetcher,
        &oracle,
        SolverConfig {
            max_steps: 3,
            ..config(60, 30)
        },
    );

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(
        report.outcome,
        ChainOutcome::failed(ChainError::StepLimit { max_steps: 3 })
    );
    assert_eq!(fetcher.fetched().len(), 3);
}

#[tokio::test]
async fn hidden_payload_drives_question_and_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": true})))
        .expect(1)
        .mount(&server)
        .await;

    let hidden = encode_hidden_payload(&format!(
        "Which word is hidden here? Submit it to {}/submit",
        server.uri()
    ));
    let fetcher = Arc::new(FakeFetcher::with_pages(&[(
        START,
        format!("Is this the question? No. {hidden}"),
    )]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = controller(&fetcher, &oracle, config(60, 30));

    let report = ctl.run(ctl.session("a@b.com", "S", START)).await;

    assert_eq!(report.outcome, ChainOutcome::Completed);
    let request = oracle.request(0);
    assert_eq!(request.question, "Which word is hidden here?");
    assert!(request.context.starts_with("Decoded hidden content:"));
}

#[tokio::test]
async fn spawned_session_runs_independently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(verdict(json!({"correct": true})))
        .mount(&server)
        .await;

    let fetcher = Arc::new(FakeFetcher::with_pages(&[(START, page("What is 2+2?", &server))]));
    let oracle = Arc::new(ScriptedOracle::default());
    let ctl = Arc::new(controller(&fetcher, &oracle, config(60, 30)));

    let handle = ctl.spawn(ctl.session("a@b.com", "S", START));
    let report = handle.await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(report.steps.len(), 1);
    assert!(report.elapsed_ms < 60_000);
}

