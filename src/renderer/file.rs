//! Renderer that plays frames into a raw PCM file.
//!
//! Useful for headless runs: the written file is the exact audio the avatar
//! would have lip-synced, playable with `aplay -f S16_LE -r 16000 -c 1`.

use crate::audio::frame::AudioFrame;
use crate::error::{AvatalkError, Result};
use crate::renderer::events::SubscriptionId;
use crate::renderer::facade::{RendererConfig, RendererEvent, RendererFacade, RendererState};
use crate::renderer::lifecycle::Lifecycle;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct PcmFileRenderer {
    lifecycle: Lifecycle,
    sink: Mutex<Option<BufWriter<File>>>,
}

impl PcmFileRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(config: &RendererConfig) -> std::result::Result<File, String> {
        let path = config
            .audio_sink
            .as_ref()
            .ok_or_else(|| "no audio sink configured".to_string())?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
        Ok(file.into_std().await)
    }
}

#[async_trait::async_trait]
impl RendererFacade for PcmFileRenderer {
    fn initialize(&self, config: RendererConfig) -> Result<()> {
        if config.video_sink.is_some() {
            tracing::warn!("file renderer produces no video; video sink ignored");
        }
        self.lifecycle.initialize(config)
    }

    async fn start(&self) -> Result<()> {
        let config = self.lifecycle.begin_start()?;
        match Self::open(&config).await {
            Ok(file) => {
                *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(BufWriter::new(file));
                self.lifecycle.connected();
                self.lifecycle.started();
            }
            Err(message) => self.lifecycle.failed(message),
        }
        Ok(())
    }

    fn send_frame(&self, frame: &AudioFrame) -> Result<()> {
        self.lifecycle.ensure_accepts_frames()?;
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let writer = sink.as_mut().ok_or_else(|| AvatalkError::Renderer {
            message: "audio sink is not open".to_string(),
        })?;
        writer.write_all(&frame.bytes)?;
        tracing::trace!(sequence = frame.sequence, bytes = frame.len(), "frame written");
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
        if let Some(mut writer) = self.sink.lock().unwrap_or_else(|e| e.into_inner()).take()
            && let Err(e) = writer.flush()
        {
            tracing::warn!("failed to flush audio sink: {}", e);
        }
        self.lifecycle.close();
    }
}

impl Drop for PcmFileRenderer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSection;
    use tempfile::TempDir;

    fn config(audio_sink: Option<std::path::PathBuf>) -> RendererConfig {
        RendererConfig::from(&RendererSection {
            audio_sink,
            ..RendererSection::default()
        })
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("reply.pcm");

        let renderer = PcmFileRenderer::new();
        renderer.initialize(config(Some(path.clone()))).unwrap();
        renderer.start().await.unwrap();
        assert_eq!(renderer.state(), RendererState::Started);

        renderer.send_frame(&AudioFrame::new(0, vec![1, 2])).unwrap();
        renderer.send_frame(&AudioFrame::new(1, vec![3])).unwrap();
        renderer.close();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_sink_fails_connection() {
        let renderer = PcmFileRenderer::new();
        let (_, mut events) = renderer.subscribe();
        renderer.initialize(config(None)).unwrap();
        renderer.start().await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(RendererEvent::Failed("no audio sink configured".to_string()))
        );
        assert_eq!(renderer.state(), RendererState::Failed);
        assert!(renderer.send_frame(&AudioFrame::new(0, vec![0])).is_err());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let dir = TempDir::new().unwrap();
        let renderer = PcmFileRenderer::new();
        let (_, mut events) = renderer.subscribe();
        renderer
            .initialize(config(Some(dir.path().join("out.pcm"))))
            .unwrap();
        renderer.start().await.unwrap();
        renderer.close();

        assert_eq!(events.recv().await, Some(RendererEvent::Connected));
        assert_eq!(events.recv().await, Some(RendererEvent::Started));
        assert_eq!(events.recv().await, Some(RendererEvent::Disconnected));
        assert_eq!(events.recv().await, None);
    }
}
