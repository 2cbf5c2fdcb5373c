//! Lifecycle bookkeeping shared by the bundled renderers.

use crate::error::{AvatalkError, Result};
use crate::renderer::events::{EventSource, SubscriptionId};
use crate::renderer::facade::{RendererConfig, RendererEvent, RendererState};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<RendererState>,
    config: Mutex<Option<RendererConfig>>,
    events: EventSource<RendererEvent>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: Mutex::new(RendererState::Uninitialized),
            config: Mutex::new(None),
            events: EventSource::new(),
        }
    }
}

impl Lifecycle {
    pub(crate) fn state(&self) -> RendererState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RendererState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn initialize(&self, config: RendererConfig) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            RendererState::Uninitialized | RendererState::Initialized => {
                *self.config.lock().unwrap_or_else(|e| e.into_inner()) = Some(config);
                *state = RendererState::Initialized;
                Ok(())
            }
            other => Err(AvatalkError::Renderer {
                message: format!("cannot initialize a renderer that is {:?}", other),
            }),
        }
    }

    /// Check that `start` is allowed and hand back the stored configuration.
    pub(crate) fn begin_start(&self) -> Result<RendererConfig> {
        match self.state() {
            RendererState::Initialized | RendererState::Failed => self
                .config
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or_else(|| AvatalkError::Renderer {
                    message: "renderer has no configuration".to_string(),
                }),
            RendererState::Uninitialized => Err(AvatalkError::Renderer {
                message: "renderer must be initialized before start".to_string(),
            }),
            other => Err(AvatalkError::Renderer {
                message: format!("cannot start a renderer that is {:?}", other),
            }),
        }
    }

    pub(crate) fn connected(&self) {
        self.set_state(RendererState::Connected);
        tracing::info!("renderer connected");
        self.events.emit(RendererEvent::Connected);
    }

    pub(crate) fn started(&self) {
        self.set_state(RendererState::Started);
        tracing::debug!("renderer started");
        self.events.emit(RendererEvent::Started);
    }

    pub(crate) fn failed(&self, message: String) {
        self.set_state(RendererState::Failed);
        tracing::error!(%message, "renderer connection failed");
        self.events.emit(RendererEvent::Failed(message));
    }

    pub(crate) fn ensure_accepts_frames(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_frames() {
            Ok(())
        } else {
            Err(AvatalkError::Renderer {
                message: format!("frame sent to a renderer that is {:?}", state),
            })
        }
    }

    pub(crate) fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RendererEvent>) {
        self.events.subscribe()
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Move to Closed. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, RendererState::Closed)
        };
        if previous == RendererState::Closed {
            return false;
        }
        if previous.accepts_frames() {
            self.events.emit(RendererEvent::Disconnected);
        }
        self.events.close();
        tracing::debug!("renderer closed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RendererConfig {
        RendererConfig {
            credential: String::new(),
            face_id: "face".to_string(),
            handle_silence: true,
            video_sink: None,
            audio_sink: None,
        }
    }

    #[test]
    fn test_start_requires_initialize() {
        let lifecycle = Lifecycle::default();
        assert!(lifecycle.begin_start().is_err());

        lifecycle.initialize(config()).unwrap();
        assert_eq!(lifecycle.begin_start().unwrap().face_id, "face");
    }

    #[test]
    fn test_frames_rejected_until_connected() {
        let lifecycle = Lifecycle::default();
        lifecycle.initialize(config()).unwrap();
        assert!(lifecycle.ensure_accepts_frames().is_err());

        lifecycle.connected();
        assert!(lifecycle.ensure_accepts_frames().is_ok());
    }

    #[tokio::test]
    async fn test_close_emits_disconnected_once() {
        let lifecycle = Lifecycle::default();
        let (_, mut events) = lifecycle.subscribe();
        lifecycle.initialize(config()).unwrap();
        lifecycle.connected();

        assert!(lifecycle.close());
        assert!(!lifecycle.close());

        assert_eq!(events.recv().await, Some(RendererEvent::Connected));
        assert_eq!(events.recv().await, Some(RendererEvent::Disconnected));
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_closed_renderer_cannot_restart() {
        let lifecycle = Lifecycle::default();
        lifecycle.initialize(config()).unwrap();
        lifecycle.close();

        assert!(lifecycle.begin_start().is_err());
        assert!(lifecycle.initialize(config()).is_err());
    }
}
