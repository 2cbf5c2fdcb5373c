//! Language-model replies.
//!
//! One client covers both the generic chat endpoint and agent deployments;
//! which one is used is purely configuration (`endpoint` and `agent_id`).

use crate::config::CompletionSection;
use crate::error::{Result, ServiceFailure, Stage};
use crate::services::http;
use crate::services::mock::Script;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Ask the model for a reply to `prompt`, scoped to `session`.
    ///
    /// Returns the reply text as delivered; an empty string means the service
    /// answered without content.
    async fn complete(
        &self,
        prompt: &str,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Arc<T> {
    async fn complete(
        &self,
        prompt: &str,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<String> {
        (**self).complete(prompt, session, cancel).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    /// End-user id, used by the service for abuse tracking and by agents for memory.
    user: &'a str,
    metadata: RequestMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestMetadata<'a> {
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_reply(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default()
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletion {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    agent_id: Option<String>,
}

impl ChatCompletion {
    pub fn new(section: &CompletionSection) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            endpoint: section.endpoint.clone(),
            api_key: section.api_key.clone(),
            model: section.model.clone(),
            agent_id: section.agent_id.clone(),
        })
    }

    fn body<'a>(&'a self, prompt: &'a str, session: &'a Session) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            user: session.user_id(),
            metadata: RequestMetadata {
                session_id: session.session_id(),
                agent_id: self.agent_id.as_deref(),
            },
        }
    }

    async fn request(&self, prompt: &str, session: &Session) -> Result<String> {
        let stage = Stage::Completion;
        let request = self
            .client
            .post(http::join_url(&self.endpoint, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&self.body(prompt, session));

        let response: ChatResponse = http::send(stage, request)
            .await?
            .json()
            .await
            .map_err(|e| http::request_failed(stage, e))?;

        Ok(response.into_reply())
    }
}

#[async_trait::async_trait]
impl CompletionClient for ChatCompletion {
    async fn complete(
        &self,
        prompt: &str,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tracing::debug!(
            model = %self.model,
            agent = self.agent_id.as_deref().unwrap_or("-"),
            session = session.session_id(),
            "requesting completion"
        );
        http::cancellable(Stage::Completion, cancel, self.request(prompt, session)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock completion client for testing
#[derive(Debug, Clone)]
pub struct MockCompletion {
    script: Script<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletion {
    /// Create a mock that answers "mock reply"
    pub fn new() -> Self {
        Self {
            script: Script::respond("mock reply".to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return a specific reply
    pub fn with_response(mut self, response: &str) -> Self {
        self.script.set_response(response.to_string());
        self
    }

    /// Configure the mock to fail with `reason`
    pub fn with_failure(mut self, reason: ServiceFailure) -> Self {
        self.script.set_failure(reason);
        self
    }

    /// Never answer; the call only ends through cancellation
    pub fn pending_until_cancelled(mut self) -> Self {
        self.script.set_pending();
        self
    }

    /// Wait `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.set_delay(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }

    pub fn cancellations(&self) -> usize {
        self.script.cancellations()
    }

    /// Prompts received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(
        &self,
        prompt: &str,
        _session: &Session,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.script.run(Stage::Completion, cancel).await
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("sess-1", "user-1")
    }

    #[test]
    fn test_request_body_carries_session_scope() {
        let client = ChatCompletion::new(&CompletionSection::default()).unwrap();
        let session = session();
        let body = serde_json::to_value(client.body("hello", &session)).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hello"}],
                "user": "user-1",
                "metadata": {"session_id": "sess-1"}
            })
        );
    }

    #[test]
    fn test_agent_id_switches_to_agent_deployment() {
        let section = CompletionSection {
            agent_id: Some("agent-7".to_string()),
            ..CompletionSection::default()
        };
        let client = ChatCompletion::new(&section).unwrap();
        let session = session();
        let body = serde_json::to_value(client.body("hi", &session)).unwrap();

        assert_eq!(body["metadata"]["agent_id"], "agent-7");
    }

    #[test]
    fn test_reply_is_first_choice_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "hi there"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        }))
        .unwrap();
        assert_eq!(response.into_reply(), "hi there");
    }

    #[test]
    fn test_missing_content_is_empty_reply() {
        let no_choices: ChatResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(no_choices.into_reply(), "");

        let null_content: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null}}]
        }))
        .unwrap();
        assert_eq!(null_content.into_reply(), "");
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let mock = MockCompletion::new().with_response("hi there");
        let reply = mock
            .complete("hello", &session(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "hi there");
        assert_eq!(mock.prompts(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_delay_is_cancellable() {
        let mock = MockCompletion::new().with_delay(Duration::from_secs(30));
        let token = CancellationToken::new();
        token.cancel();

        let err = mock
            .complete("a", &session(), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(mock.cancellations(), 1);
    }
}
