use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

use crate::{config, llm::LlmError};

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Plain generated-text payload returned by chat, reflection, and summary
/// endpoints.
#[derive(Debug, Serialize, Clone)]
pub struct GeneratedText {
    pub text: String,
}

impl GeneratedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}

/// Map a generation failure onto the companion-voice error surface: quota
/// exhaustion gets the come-back-tomorrow message, everything else the
/// generic connection one.
pub fn llm_failure_response(err: &LlmError) -> (StatusCode, Json<ApiMessage>) {
    match err {
        LlmError::RateLimited => json_error(StatusCode::TOO_MANY_REQUESTS, config::RATE_LIMIT_MESSAGE),
        LlmError::Gateway(_) => json_error(StatusCode::BAD_GATEWAY, config::CONNECTION_MESSAGE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn rate_limit_maps_to_too_many_requests() {
        let (status, body) = llm_failure_response(&LlmError::RateLimited);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.0.message, config::RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn gateway_failure_maps_to_bad_gateway() {
        let (status, body) = llm_failure_response(&LlmError::Gateway(anyhow!("boom")));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.0.message, config::CONNECTION_MESSAGE);
    }
}
