use crate::audio::frame::AudioFrame;
use crate::error::Result;
use crate::renderer::events::SubscriptionId;
use crate::renderer::facade::{RendererConfig, RendererEvent, RendererFacade, RendererState};
use crate::renderer::lifecycle::Lifecycle;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-memory renderer that records every frame it receives.
///
/// Clones share the same recording, so a test can keep one handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectorRenderer {
    lifecycle: Arc<Lifecycle>,
    frames: Arc<Mutex<Vec<AudioFrame>>>,
    connection_failure: Option<String>,
}

impl CollectorRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` report a failed connection instead of connecting.
    pub fn with_connection_failure(mut self, message: &str) -> Self {
        self.connection_failure = Some(message.to_string());
        self
    }

    /// Initialize with an empty configuration and start. For tests.
    pub async fn started() -> Result<Self> {
        let renderer = Self::new();
        renderer.initialize(RendererConfig {
            credential: String::new(),
            face_id: String::new(),
            handle_silence: true,
            video_sink: None,
            audio_sink: None,
        })?;
        renderer.start().await?;
        Ok(renderer)
    }

    /// Frames received so far, in delivery order.
    pub fn frames(&self) -> Vec<AudioFrame> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Concatenated bytes of every received frame.
    pub fn audio(&self) -> Vec<u8> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flat_map(|frame| frame.bytes.iter().copied())
            .collect()
    }

    pub fn clear(&self) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait::async_trait]
impl RendererFacade for CollectorRenderer {
    fn initialize(&self, config: RendererConfig) -> Result<()> {
        self.lifecycle.initialize(config)
    }

    async fn start(&self) -> Result<()> {
        self.lifecycle.begin_start()?;
        match &self.connection_failure {
            Some(message) => self.lifecycle.failed(message.clone()),
            None => {
                self.lifecycle.connected();
                self.lifecycle.started();
            }
        }
        Ok(())
    }

    fn send_frame(&self, frame: &AudioFrame) -> Result<()> {
        self.lifecycle.ensure_accepts_frames()?;
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.clone());
        Ok(())
    }

    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RendererEvent>) {
        self.lifecycle.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lifecycle.unsubscribe(id)
    }

    fn state(&self) -> RendererState {
        self.lifecycle.state()
    }

    fn close(&self) {
        self.lifecycle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_frames_in_order() {
        let renderer = CollectorRenderer::started().await.unwrap();

        renderer.send_frame(&AudioFrame::new(0, vec![1, 2])).unwrap();
        renderer.send_frame(&AudioFrame::new(1, vec![3])).unwrap();

        let sequences: Vec<u64> = renderer.frames().iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(renderer.audio(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_start_emits_connected_then_started() {
        let renderer = CollectorRenderer::new();
        let (_, mut events) = renderer.subscribe();
        renderer
            .initialize(RendererConfig::from(&crate::config::RendererSection::default()))
            .unwrap();
        renderer.start().await.unwrap();

        assert_eq!(events.recv().await, Some(RendererEvent::Connected));
        assert_eq!(events.recv().await, Some(RendererEvent::Started));
        assert_eq!(renderer.state(), RendererState::Started);
    }

    #[tokio::test]
    async fn test_start_before_initialize_is_rejected() {
        let renderer = CollectorRenderer::new();
        assert!(renderer.start().await.is_err());
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported_as_event() {
        let renderer = CollectorRenderer::new().with_connection_failure("handshake refused");
        let (_, mut events) = renderer.subscribe();
        renderer
            .initialize(RendererConfig::from(&crate::config::RendererSection::default()))
            .unwrap();
        renderer.start().await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(RendererEvent::Failed("handshake refused".to_string()))
        );
        assert!(renderer.send_frame(&AudioFrame::new(0, vec![0])).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_frames() {
        let renderer = CollectorRenderer::started().await.unwrap();
        renderer.close();
        renderer.close();

        assert_eq!(renderer.state(), RendererState::Closed);
        assert!(renderer.send_frame(&AudioFrame::new(0, vec![0])).is_err());
        assert_eq!(renderer.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_recording() {
        let renderer = CollectorRenderer::started().await.unwrap();
        let handle = renderer.clone();

        renderer.send_frame(&AudioFrame::new(0, vec![5])).unwrap();
        assert_eq!(handle.frame_count(), 1);

        handle.clear();
        assert_eq!(renderer.frame_count(), 0);
    }
}
