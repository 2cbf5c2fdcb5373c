use crate::config::SynthesisSection;
use crate::error::{Result, ServiceFailure, Stage};
use crate::services::http;
use crate::services::mock::Script;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for text-to-speech synthesis.
///
/// Implementations return raw 16-bit little-endian PCM at 16 kHz.
#[async_trait::async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Voice used for synthesis
    fn voice(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: SynthesisClient + ?Sized> SynthesisClient for Arc<T> {
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        (**self).synthesize(text, cancel).await
    }

    fn voice(&self) -> &str {
        (**self).voice()
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs-style `/v1/text-to-speech/{voice}` client.
pub struct ElevenLabsSynthesis {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    output_format: String,
}

impl ElevenLabsSynthesis {
    pub fn new(section: &SynthesisSection) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            endpoint: section.endpoint.clone(),
            api_key: section.api_key.clone(),
            voice_id: section.voice_id.clone(),
            model_id: section.model_id.clone(),
            output_format: section.output_format.clone(),
        })
    }

    fn url(&self) -> String {
        http::join_url(
            &self.endpoint,
            &format!(
                "v1/text-to-speech/{}?output_format={}",
                self.voice_id, self.output_format
            ),
        )
    }

    async fn request(&self, text: &str) -> Result<Vec<u8>> {
        let stage = Stage::Synthesis;
        let request = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .json(&SpeechRequest {
                text,
                model_id: &self.model_id,
            });

        let audio = http::send(stage, request)
            .await?
            .bytes()
            .await
            .map_err(|e| http::request_failed(stage, e))?;

        Ok(audio.to_vec())
    }
}

#[async_trait::async_trait]
impl SynthesisClient for ElevenLabsSynthesis {
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), voice = %self.voice_id, "synthesizing");
        http::cancellable(Stage::Synthesis, cancel, self.request(text)).await
    }

    fn voice(&self) -> &str {
        &self.voice_id
    }
}

/// Mock synthesis client for testing
#[derive(Debug, Clone)]
pub struct MockSynthesis {
    script: Script<Vec<u8>>,
    texts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSynthesis {
    /// Create a mock that answers with 16 bytes of silence
    pub fn new() -> Self {
        Self {
            script: Script::respond(vec![0u8; 16]),
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return specific audio bytes
    pub fn with_response(mut self, audio: Vec<u8>) -> Self {
        self.script.set_response(audio);
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

    /// Texts received, in call order
    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl SynthesisClient for MockSynthesis {
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        self.script.run(Stage::Synthesis, cancel).await
    }

    fn voice(&self) -> &str {
        "mock"
    }
}
