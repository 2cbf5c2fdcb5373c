use crate::config::TranscriptionSection;
use crate::defaults;
use crate::error::{Result, ServiceFailure, Stage};
use crate::services::http;
use crate::services::mock::Script;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (hosted service vs mock).
#[async_trait::async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe a captured audio buffer.
    ///
    /// # Arguments
    /// * `audio` - Audio bytes as captured, passed to the service unchanged
    /// * `cancel` - Turn token; once cancelled the call resolves as `StageCancelled`
    async fn transcribe(&self, audio: &[u8], cancel: &CancellationToken) -> Result<String>;

    /// Name of the backing model or service
    fn model_name(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: TranscriptionClient + ?Sized> TranscriptionClient for Arc<T> {
    async fn transcribe(&self, audio: &[u8], cancel: &CancellationToken) -> Result<String> {
        (**self).transcribe(audio, cancel).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct OpenAiTranscription {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscription {
    pub fn new(section: &TranscriptionSection) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            endpoint: section.endpoint.clone(),
            api_key: section.api_key.clone(),
            model: section.model.clone(),
        })
    }

    async fn request(&self, audio: &[u8]) -> Result<String> {
        let stage = Stage::Transcription;
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(defaults::UPLOAD_FILE_NAME)
            .mime_str("audio/wav")
            .map_err(|e| http::request_failed(stage, e))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let request = self
            .client
            .post(http::join_url(&self.endpoint, "audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form);

        let response: TranscriptionResponse = http::send(stage, request)
            .await?
            .json()
            .await
            .map_err(|e| http::request_failed(stage, e))?;

        Ok(response.text.trim().to_string())
    }
}

#[async_trait::async_trait]
impl TranscriptionClient for OpenAiTranscription {
    async fn transcribe(&self, audio: &[u8], cancel: &CancellationToken) -> Result<String> {
        tracing::debug!(bytes = audio.len(), model = %self.model, "transcribing");
        http::cancellable(Stage::Transcription, cancel, self.request(audio)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock transcription client for testing
#[derive(Debug, Clone)]
pub struct MockTranscription {
    script: Script<String>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Default for MockTranscription {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscription {
    /// Create a mock that answers "mock transcription"
    pub fn new() -> Self {
        Self {
            script: Script::respond("mock transcription".to_string()),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return a specific transcript
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

    /// Number of transcribe calls made
    pub fn calls(&self) -> usize {
        self.script.calls()
    }

    /// Number of calls that resolved as cancelled
    pub fn cancellations(&self) -> usize {
        self.script.cancellations()
    }

    /// Audio buffers received, in call order
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl TranscriptionClient for MockTranscription {
    async fn transcribe(&self, audio: &[u8], cancel: &CancellationToken) -> Result<String> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(audio.to_vec());
        self.script.run(Stage::Transcription, cancel).await
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_configured_response() {
        let mock = MockTranscription::new().with_response("hello world");
        let text = mock
            .transcribe(&[1, 2, 3], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.received(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_mock_failure_is_a_transcription_error() {
        let mock = MockTranscription::new().with_failure(ServiceFailure::Status {
            code: 500,
            body: "boom".to_string(),
        });

        let err = mock
            .transcribe(&[1], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message().as_deref(),
            Some("Error transcribing audio. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_pending_mock_resolves_when_cancelled() {
        let mock = MockTranscription::new().pending_until_cancelled();
        let token = CancellationToken::new();

        let call = {
            let mock = mock.clone();
            let token = token.clone();
            tokio::spawn(async move { mock.transcribe(&[9], &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert!(call.await.unwrap().unwrap_err().is_cancellation());
        assert_eq!(mock.cancellations(), 1);
    }

    #[tokio::test]
    async fn test_arc_wrapper_delegates() {
        let mock = Arc::new(MockTranscription::new().with_response("shared"));
        let client: &dyn TranscriptionClient = &mock;

        assert_eq!(client.model_name(), "mock");
        assert_eq!(
            client
                .transcribe(&[0], &CancellationToken::new())
                .await
                .unwrap(),
            "shared"
        );
    }

    #[test]
    fn test_response_without_text_field_is_empty() {
        let parsed: TranscriptionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn test_http_client_reports_model() {
        let section = TranscriptionSection::default();
        let client = OpenAiTranscription::new(&section).unwrap();
        assert_eq!(client.model_name(), defaults::DEFAULT_TRANSCRIPTION_MODEL);
    }
}
