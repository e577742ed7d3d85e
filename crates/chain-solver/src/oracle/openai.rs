//! OpenAI-compatible chat-completions oracle.

use super::{AnswerRequest, Oracle};
use crate::config::{ConfigError, OracleConfig};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Largest prefix of `s` no longer than `max_bytes` that ends on a char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub struct OpenAiOracle {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_context_chars: usize,
}

impl OpenAiOracle {
    pub fn new(config: OracleConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            client: reqwest::Client::builder().build().unwrap_or_default(),
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_context_chars: config.max_context_chars,
        })
    }

    fn build_prompt(&self, request: &AnswerRequest) -> String {
        let context = truncate_at_char_boundary(&request.context, self.max_context_chars);
        let mut prompt = format!(
            "You are solving one step of a chain of web puzzles. Read the page and answer \
             the question exactly as the page requires.\n\n\
             Question: {}\n\n\
             Page content (may be truncated):\n{context}\n\n\
             Rules:\n\
             - Work it out carefully, but reply with the final answer only.\n\
             - Check for hidden text, HTML comments, encoded strings and format instructions.\n\
             - If the page specifies an answer format, follow it exactly.\n\
             - Answers are usually a number, a word, a short phrase or JSON.\n\
             - Do not prefix the answer with \"Answer:\" or similar.",
            request.question
        );

        if let Some(hint) = &request.retry {
            prompt.push_str(&format!(
                "\n\nPrevious answer was wrong: {}\nReason given: {}\n\
                 Think step-by-step and fix it.",
                hint.previous_answer,
                hint.reason.as_deref().unwrap_or("none"),
            ));
        }
        prompt
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn solicit(&self, request: &AnswerRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: self.build_prompt(request),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        info!(model = %self.model, retry = request.retry.is_some(), "calling oracle");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("oracle request failed")?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!(
                "oracle API error {status}: {}",
                truncate_at_char_boundary(&raw_body, 500)
            );
        }
        debug!(body_len = raw_body.len(), "oracle raw response");

        let parsed: ChatResponse = serde_json::from_str(&raw_body).with_context(|| {
            format!(
                "failed to parse oracle response: {}",
                truncate_at_char_boundary(&raw_body, 500)
            )
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("oracle response had no content")
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::RetryHint;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle_for(server: &MockServer) -> OpenAiOracle {
        OpenAiOracle::new(OracleConfig {
            api_key: Some("sk-test".into()),
            api_base: format!("{}/v1/", server.uri()),
            max_context_chars: 64,
            ..OracleConfig::default()
        })
        .unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
    }

    #[test]
    fn missing_key_is_a_config_error() {
        assert_eq!(
            OpenAiOracle::new(OracleConfig::default()).err(),
            Some(ConfigError::MissingApiKey)
        );
        let blank = OracleConfig {
            api_key: Some("   ".into()),
            ..OracleConfig::default()
        };
        assert_eq!(OpenAiOracle::new(blank).err(), Some(ConfigError::MissingApiKey));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
        assert_eq!(truncate_at_char_boundary("hello", 3), "hel");
        // 'é' is two bytes; cutting in the middle backs off.
        assert_eq!(truncate_at_char_boundary("aé", 2), "a");
    }

    #[tokio::test]
    async fn posts_chat_completion_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 1000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Answer: 4")))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = oracle_for(&server);
        let raw = oracle
            .solicit(&AnswerRequest::new("What is 2+2?", "<p>2+2</p>"))
            .await
            .unwrap();
        assert_eq!(raw, "Answer: 4");
    }

    #[tokio::test]
    async fn prompt_carries_truncated_context_and_retry_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("5")))
            .mount(&server)
            .await;

        let oracle = oracle_for(&server);
        let context = format!("{}TAIL", "x".repeat(64));
        let request = AnswerRequest::new("What is 2+3?", context).with_retry(RetryHint {
            previous_answer: "6".into(),
            reason: Some("format".into()),
        });
        oracle.solicit(&request).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = received[0].body_json().unwrap();
        let prompt = body["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("Question: What is 2+3?"));
        assert!(!prompt.contains("TAIL"));
        assert!(prompt.contains("Previous answer was wrong: 6"));
        assert!(prompt.contains("Reason given: format"));
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = oracle_for(&server)
            .solicit(&AnswerRequest::new("What is 2+2?", ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let result = oracle_for(&server)
            .solicit(&AnswerRequest::new("What is 2+2?", ""))
            .await;
        assert!(result.is_err());
    }
}
