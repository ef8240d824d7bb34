use std::env;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const GENERATION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const BODY_PREVIEW_CHARS: usize = 500;

/// Chat roles understood by the generation endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Model => "model",
        }
    }
}

/// One turn of an ordered conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub text: String,
}

impl ChatTurn {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Defines the shape of a single generation call: a system instruction plus
/// the ordered turns ending with the newest user input.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_instruction: String,
    pub turns: Vec<ChatTurn>,
}

impl LlmRequest {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            turns: Vec::new(),
        }
    }

    pub fn with_turns(mut self, turns: Vec<ChatTurn>) -> Self {
        self.turns = turns;
        self
    }

    /// Append a user turn.
    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.turns.push(ChatTurn::new(MessageRole::User, text));
        self
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

/// Full response surface returned to callers.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
}

/// Failure surface of the gateway. Quota exhaustion keeps its own variant so
/// operation boundaries can answer with the companion's come-back-tomorrow
/// message instead of the generic one.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation quota exhausted")]
    RateLimited,
    #[error(transparent)]
    Gateway(#[from] anyhow::Error),
}

/// Main entry point for invoking the generation endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// Build a client from environment variables. A missing API key is a
    /// startup error, not a degraded mode.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").context("GEMINI_API_KEY env var is missing")?;
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            http: Client::new(),
            api_key,
            model,
        })
    }

    /// Execute a request. No retries; a failed call is reported once and the
    /// user repeats the action if they want another attempt.
    pub async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let payload = build_payload(&request);
        let url = format!("{GENERATION_ENDPOINT}/{}:generateContent", self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| gateway(anyhow!(err).context("failed to reach generation endpoint")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| gateway(anyhow!(err).context("failed to read generation response body")))?;

        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS || is_quota_error(&body) {
                return Err(LlmError::RateLimited);
            }
            return Err(gateway(anyhow!(
                "generation call failed with status {}: {}",
                status,
                preview(&body)
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|err| {
            gateway(anyhow!(
                "failed to parse generation response as JSON: {err}. Response body: {}",
                preview(&body)
            ))
        })?;

        let text = extract_text(&parsed).ok_or_else(|| {
            gateway(anyhow!(
                "generation response contained no candidate text: {}",
                preview(&body)
            ))
        })?;

        let prompt_tokens = approximate_token_count(
            &request
                .turns
                .iter()
                .map(|turn| turn.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let mut token_usage = parsed
            .usage_metadata
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_token_count.unwrap_or_default(),
                response_tokens: usage.candidates_token_count.unwrap_or_default(),
                total_tokens: usage.total_token_count.unwrap_or_default(),
            })
            .unwrap_or_default();
        if token_usage.prompt_tokens == 0 {
            token_usage.prompt_tokens = prompt_tokens;
        }
        if token_usage.response_tokens == 0 {
            token_usage.response_tokens = approximate_token_count(&text);
        }
        token_usage.total_tokens = token_usage.prompt_tokens + token_usage.response_tokens;

        debug!(
            model = %self.model,
            total_tokens = token_usage.total_tokens,
            "generation completed"
        );

        Ok(LlmResponse { text, token_usage })
    }
}

fn gateway(err: anyhow::Error) -> LlmError {
    LlmError::Gateway(err)
}

fn build_payload(request: &LlmRequest) -> GenerateContentPayload {
    GenerateContentPayload {
        system_instruction: ContentPayload {
            role: None,
            parts: vec![PartPayload {
                text: request.system_instruction.clone(),
            }],
        },
        contents: request
            .turns
            .iter()
            .map(|turn| ContentPayload {
                role: Some(turn.role.as_str()),
                parts: vec![PartPayload {
                    text: turn.text.clone(),
                }],
            })
            .collect(),
    }
}

/// Quota markers the endpoint embeds in error bodies.
fn is_quota_error(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("resource_exhausted") || lower.contains("exceeded your current quota")
}

/// Assistant text from the first candidate that carries any.
fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    response.candidates.iter().find_map(|candidate| {
        let text = candidate
            .content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() { None } else { Some(text) }
    })
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

fn approximate_token_count(input: &str) -> usize {
    if input.trim().is_empty() {
        return 0;
    }
    input
        .split_whitespace()
        .filter(|segment| !segment.is_empty())
        .count()
}

#[derive(Debug, Serialize)]
struct GenerateContentPayload {
    #[serde(rename = "systemInstruction")]
    system_instruction: ContentPayload,
    contents: Vec<ContentPayload>,
}

#[derive(Debug, Serialize)]
struct ContentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<PartPayload>,
}

#[derive(Debug, Serialize)]
struct PartPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<CandidatePayload>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadataPayload>,
}

#[derive(Debug, Deserialize)]
struct CandidatePayload {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadataPayload {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: Option<usize>,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: Option<usize>,
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_markers_are_recognized() {
        assert!(is_quota_error(
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#
        ));
        assert!(is_quota_error(
            "You exceeded your current quota, please check your plan."
        ));
        assert!(!is_quota_error(
            r#"{"error":{"status":"INVALID_ARGUMENT"}}"#
        ));
    }

    #[test]
    fn extracts_candidate_text_and_usage() {
        let body = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "hey "}, {"text": "soundous"}]}}
            ],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4, "totalTokenCount": 16}
        }"#;

        let parsed: GenerateContentResponse = serde_json::from_str(body).expect("parse response");
        assert_eq!(extract_text(&parsed).as_deref(), Some("hey soundous"));

        let usage = parsed.usage_metadata.expect("usage metadata");
        assert_eq!(usage.prompt_token_count, Some(12));
        assert_eq!(usage.candidates_token_count, Some(4));
    }

    #[test]
    fn empty_candidates_yield_no_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": []}"#).expect("parse response");
        assert_eq!(extract_text(&parsed), None);
    }

    #[test]
    fn payload_maps_roles_and_system_instruction() {
        let request = LlmRequest::new("be kind")
            .with_turns(vec![
                ChatTurn::new(MessageRole::User, "hi"),
                ChatTurn::new(MessageRole::Model, "hello"),
            ])
            .user("how are you?");

        let payload = build_payload(&request);
        assert_eq!(payload.system_instruction.role, None);
        assert_eq!(payload.system_instruction.parts[0].text, "be kind");

        let roles: Vec<_> = payload
            .contents
            .iter()
            .map(|content| content.role.unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(payload.contents[2].parts[0].text, "how are you?");
    }

    #[test]
    fn token_count_approximation_splits_on_whitespace() {
        assert_eq!(approximate_token_count(""), 0);
        assert_eq!(approximate_token_count("   "), 0);
        assert_eq!(approximate_token_count("one two  three"), 3);
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(BODY_PREVIEW_CHARS + 50);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.len(), BODY_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
