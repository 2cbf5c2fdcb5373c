use crate::audio::frame::AudioFrame;
use crate::config::RendererSection;
use crate::error::Result;
use crate::renderer::events::SubscriptionId;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Everything a renderer needs before it can start.
#[derive(Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub credential: String,
    pub face_id: String,
    /// Let the renderer idle the avatar through gaps in the audio.
    pub handle_silence: bool,
    pub video_sink: Option<PathBuf>,
    pub audio_sink: Option<PathBuf>,
}

impl fmt::Debug for RendererConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererConfig")
            .field("credential", &"<redacted>")
            .field("face_id", &self.face_id)
            .field("handle_silence", &self.handle_silence)
            .field("video_sink", &self.video_sink)
            .field("audio_sink", &self.audio_sink)
            .finish()
    }
}

impl From<&RendererSection> for RendererConfig {
    fn from(section: &RendererSection) -> Self {
        Self {
            credential: section.api_key.clone(),
            face_id: section.face_id.clone(),
            handle_silence: section.handle_silence,
            video_sink: section.video_sink.clone(),
            audio_sink: section.audio_sink.clone(),
        }
    }
}

/// Renderer lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    Connected,
    Disconnected,
    /// The connection could not be established or was lost. Not retried.
    Failed(String),
    /// Playback began; frames are now rendered.
    Started,
}

/// Where a renderer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Initialized,
    Connected,
    Started,
    Failed,
    Closed,
}

impl RendererState {
    /// True when frames are accepted.
    pub fn accepts_frames(self) -> bool {
        matches!(self, RendererState::Connected | RendererState::Started)
    }
}

/// Real-time avatar renderer driven by audio frames.
///
/// Methods take `&self` so one renderer can be shared between the pipeline
/// (frames) and the application (lifecycle).
#[async_trait::async_trait]
pub trait RendererFacade: Send + Sync {
    /// Store the configuration. Required before [`RendererFacade::start`].
    fn initialize(&self, config: RendererConfig) -> Result<()>;

    /// Begin the connection handshake.
    ///
    /// The outcome is reported through events (`Connected`, `Started` or
    /// `Failed`). Errors are returned only for misuse, such as starting an
    /// uninitialized or closed renderer.
    async fn start(&self) -> Result<()>;

    /// Push one audio frame. Fire-and-forget: returns once the frame is
    /// handed over, with no backpressure.
    fn send_frame(&self, frame: &AudioFrame) -> Result<()>;

    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RendererEvent>);

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn state(&self) -> RendererState;

    /// Release the renderer and end every subscription. Idempotent.
    fn close(&self);
}
