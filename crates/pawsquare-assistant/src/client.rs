use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;

use pawsquare_types::api::{ChatMessage, ChatRequest, ChatRole, ErrorBody};

use crate::sse::SseParser;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    AuthRequired(String),
    #[error("{0}")]
    Upstream(String),
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
}

/// Streaming client for the assistant proxy. Owns the conversation
/// transcript: the user message is appended optimistically, the assistant
/// message grows as deltas arrive, and a failed send removes this turn from
/// the transcript entirely — the caller must resend manually.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    transcript: Vec<ChatMessage>,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Send one user turn and stream the reply. Returns the complete
    /// assistant message: the concatenation of all received delta fragments
    /// in arrival order.
    pub async fn send(&mut self, text: &str) -> Result<String, AssistantError> {
        let turn_start = self.transcript.len();
        self.transcript.push(ChatMessage {
            role: ChatRole::User,
            content: text.to_string(),
        });

        match self.stream_completion().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // Roll back the optimistic user message (and any partial reply)
                self.transcript.truncate(turn_start);
                Err(e)
            }
        }
    }

    async fn stream_completion(&mut self) -> Result<String, AssistantError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&ChatRequest {
                messages: self.transcript.clone(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| "The assistant request failed.".to_string());
            return Err(classify_error(status, message));
        }

        let mut parser = SseParser::new();
        let mut assistant = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for delta in parser.feed(&bytes) {
                assistant.push_str(&delta);
                self.apply_assistant_content(&assistant);
            }
        }

        Ok(assistant)
    }

    /// Update the trailing assistant message in place, or start one if the
    /// last message is not an assistant turn yet.
    fn apply_assistant_content(&mut self, content: &str) {
        match self.transcript.last_mut() {
            Some(message) if message.role == ChatRole::Assistant => {
                message.content = content.to_string();
            }
            _ => self.transcript.push(ChatMessage {
                role: ChatRole::Assistant,
                content: content.to_string(),
            }),
        }
    }
}

/// Pick the error variant from the response status, falling back to message
/// text so proxy-origin and upstream-origin throttling both land on
/// `RateLimited`.
fn classify_error(status: StatusCode, message: String) -> AssistantError {
    if status == StatusCode::TOO_MANY_REQUESTS || message.contains("messages per hour") {
        return AssistantError::RateLimited(message);
    }
    if status == StatusCode::UNAUTHORIZED || message.contains("sign in") {
        return AssistantError::AuthRequired(message);
    }
    AssistantError::Upstream(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_classify_by_status_and_message_text() {
        assert!(matches!(
            classify_error(
                StatusCode::TOO_MANY_REQUESTS,
                "You've reached the limit of 20 messages per hour.".into()
            ),
            AssistantError::RateLimited(_)
        ));
        // Upstream throttling arrives as 429 with different text
        assert!(matches!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, "try again in a moment".into()),
            AssistantError::RateLimited(_)
        ));
        assert!(matches!(
            classify_error(
                StatusCode::UNAUTHORIZED,
                "Authentication required. Please sign in and try again.".into()
            ),
            AssistantError::AuthRequired(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::PAYMENT_REQUIRED, "temporarily unavailable".into()),
            AssistantError::Upstream(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::INTERNAL_SERVER_ERROR, "oops".into()),
            AssistantError::Upstream(_)
        ));
    }

    #[test]
    fn assistant_content_extends_the_trailing_message_only() {
        let mut client = ChatClient::new("http://localhost/assistant", "token");
        client.transcript.push(ChatMessage {
            role: ChatRole::User,
            content: "Hi".into(),
        });

        client.apply_assistant_content("He");
        client.apply_assistant_content("Hello");

        assert_eq!(client.transcript.len(), 2);
        assert_eq!(client.transcript[1].role, ChatRole::Assistant);
        assert_eq!(client.transcript[1].content, "Hello");
    }
}
