//! Text-generation service boundary.
//!
//! The pipelines only see [`Oracle`]: one system instruction plus one user
//! text in, generated text plus token counts out. [`OpenAiOracle`] is the
//! production implementation over the OpenAI Responses endpoint.

use std::ops::AddAssign;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::json;

use crate::config::OracleSettings;
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryError, RetryPolicy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleRequest {
    pub system: String,
    pub user: String,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// A blocking text-completion service.
pub trait Oracle: Send + Sync {
    fn complete(&self, request: &OracleRequest) -> Result<OracleResponse>;
}

impl<T: Oracle + ?Sized> Oracle for std::sync::Arc<T> {
    fn complete(&self, request: &OracleRequest) -> Result<OracleResponse> {
        (**self).complete(request)
    }
}

#[derive(Debug)]
enum CallError {
    Transport(reqwest::Error),
    Status(StatusCode, String),
    Protocol(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) if err.is_timeout() => write!(f, "request timed out: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Status(status, body) => {
                write!(f, "status {status}: {}", truncate_preview(body, 500))
            }
            Self::Protocol(message) => f.write_str(message),
        }
    }
}

fn classify_call_error(err: &CallError) -> RetryDecision {
    match err {
        CallError::Transport(_) => RetryDecision::Retry,
        CallError::Status(status, _)
            if *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() =>
        {
            RetryDecision::Retry
        }
        CallError::Status(_, _) | CallError::Protocol(_) => RetryDecision::Stop,
    }
}

pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiOracle {
    pub fn new(settings: &OracleSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent("research-fields-bot/0.1")
            .timeout(settings.timeout)
            .build()
            .map_err(|err| Error::Oracle(format!("build http client: {err}")))?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            endpoint: format!("{}/responses", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            retry: settings.retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn send_once(&self, request: &OracleRequest) -> std::result::Result<OracleResponse, CallError> {
        let body = json!({
            "model": self.model,
            "instructions": request.system,
            "input": request.user,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(CallError::Transport)?;
        let status = response.status();
        let text = response.text().map_err(CallError::Transport)?;
        if !status.is_success() {
            return Err(CallError::Status(status, text));
        }
        parse_response(&text).map_err(CallError::Protocol)
    }
}

impl Oracle for OpenAiOracle {
    fn complete(&self, request: &OracleRequest) -> Result<OracleResponse> {
        self.retry
            .run(
                "oracle",
                |_| self.send_once(request),
                classify_call_error,
            )
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => {
                    Error::Oracle(format!("gave up after {attempts} attempts: {last}"))
                }
                RetryError::Permanent(err) => Error::Oracle(err.to_string()),
            })
    }
}

/// Extracts generated text and usage from a Responses API payload.
pub fn parse_response(payload: &str) -> std::result::Result<OracleResponse, String> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|err| format!("parse response JSON: {err}"))?;
    let usage = value
        .get("usage")
        .map(|usage| {
            TokenUsage::new(
                usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or_default();

    if let Some(text) = value.get("output_text").and_then(|t| t.as_str()) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("response output_text is empty".to_string());
        }
        return Ok(OracleResponse {
            text: trimmed.to_string(),
            usage,
        });
    }

    let mut chunks = Vec::new();
    if let Some(output) = value.get("output").and_then(|o| o.as_array()) {
        for item in output {
            if let Some(content) = item.get("content").and_then(|c| c.as_array()) {
                for part in content {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            chunks.push(trimmed.to_string());
                        }
                    }
                }
            }
        }
    }
    if chunks.is_empty() {
        return Err(format!(
            "response missing output text: {}",
            truncate_preview(payload, 500)
        ));
    }
    Ok(OracleResponse {
        text: chunks.join("\n"),
        usage,
    })
}

pub(crate) fn truncate_preview(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let mut end = max;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = input[..end].to_string();
    out.push_str("...");
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_text_and_usage() {
        let payload = r#"{"output_text":"  Physics, Chemistry \n","usage":{"input_tokens":120,"output_tokens":7}}"#;
        let response = parse_response(payload).unwrap();
        assert_eq!(response.text, "Physics, Chemistry");
        assert_eq!(response.usage, TokenUsage::new(120, 7));
    }

    #[test]
    fn joins_content_parts_when_output_text_missing() {
        let payload = r#"{
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "first"},
                    {"type": "output_text", "text": "  "},
                    {"type": "output_text", "text": "second"}
                ]}
            ]
        }"#;
        let response = parse_response(payload).unwrap();
        assert_eq!(response.text, "first\nsecond");
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[test]
    fn rejects_payload_without_text() {
        let err = parse_response(r#"{"output":[]}"#).unwrap_err();
        assert!(err.contains("missing output text"));
        assert!(parse_response(r#"{"output_text":"   "}"#).is_err());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(10, 3);
        total += TokenUsage::new(5, 1);
        assert_eq!(total, TokenUsage::new(15, 4));
        assert_eq!(total.total(), 19);
    }

    #[test]
    fn retry_classification_matches_status() {
        assert_eq!(
            classify_call_error(&CallError::Status(StatusCode::TOO_MANY_REQUESTS, String::new())),
            RetryDecision::Retry
        );
        assert_eq!(
            classify_call_error(&CallError::Status(StatusCode::BAD_GATEWAY, String::new())),
            RetryDecision::Retry
        );
        assert_eq!(
            classify_call_error(&CallError::Status(StatusCode::UNAUTHORIZED, String::new())),
            RetryDecision::Stop
        );
        assert_eq!(
            classify_call_error(&CallError::Protocol("bad".into())),
            RetryDecision::Stop
        );
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let settings = OracleSettings {
            api_key: "key".into(),
            base_url: "http://localhost:9999/v1/".into(),
            model: "gpt-4o".into(),
            timeout: std::time::Duration::from_secs(5),
            retry: RetryPolicy::no_retry(),
        };
        let oracle = OpenAiOracle::new(&settings).unwrap();
        assert_eq!(oracle.endpoint, "http://localhost:9999/v1/responses");
        assert_eq!(oracle.model(), "gpt-4o");
    }
}
