//! Microphone capture state machine.
//!
//! Idle → Recording → Flushing → Idle. While recording, fragments from the
//! device are accumulated in arrival order; stopping concatenates them into one
//! buffer and emits it as a [`CaptureEvent::Finished`].

use crate::audio::device::{CaptureDevice, StreamStopper};
use crate::audio::wav::{self, PcmFormat};
use crate::error::{AvatalkError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a stopped device may take to close its fragment channel.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Flushing,
}

/// Events emitted by the capture controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Recording stopped with a non-empty buffer, ready to become a turn.
    Finished(Vec<u8>),
}

struct ActiveCapture {
    stopper: Box<dyn StreamStopper>,
    collector: JoinHandle<Vec<Vec<u8>>>,
    format: Option<PcmFormat>,
}

/// Owns the microphone lifecycle and the fragments captured while recording.
pub struct CaptureController {
    device: Arc<dyn CaptureDevice>,
    state: CaptureState,
    active: Option<ActiveCapture>,
    event_tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureController {
    /// Create a controller for `device` and the receiver for its events.
    pub fn new(device: Arc<dyn CaptureDevice>) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            device,
            state: CaptureState::Idle,
            active: None,
            event_tx,
        };

        (controller, event_rx)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    /// Acquire the microphone and start accumulating fragments.
    ///
    /// # Errors
    /// - `AlreadyRecording` unless idle
    /// - `DeviceUnavailable` if the host refuses; the controller stays idle
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.state != CaptureState::Idle {
            return Err(AvatalkError::AlreadyRecording);
        }

        let stream = self.device.acquire().await.map_err(|e| match e {
            AvatalkError::DeviceUnavailable { .. } => e,
            other => AvatalkError::DeviceUnavailable {
                message: other.to_string(),
            },
        })?;

        let mut fragments = stream.fragments;
        let collector = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(fragment) = fragments.recv().await {
                if !fragment.is_empty() {
                    collected.push(fragment);
                }
            }
            collected
        });

        self.active = Some(ActiveCapture {
            stopper: stream.stopper,
            collector,
            format: stream.format,
        });
        self.state = CaptureState::Recording;
        tracing::info!(device = self.device.name(), "recording started");
        Ok(())
    }

    /// Stop recording and emit the accumulated buffer.
    ///
    /// A no-op when idle. No event is emitted when nothing was captured.
    pub async fn stop_listening(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        self.state = CaptureState::Flushing;

        let result = Self::flush(active).await;
        self.state = CaptureState::Idle;

        let buffer = result?;
        if buffer.is_empty() {
            tracing::debug!("recording stopped with no audio");
            return Ok(());
        }

        tracing::info!(bytes = buffer.len(), "recording finished");
        if self.event_tx.send(CaptureEvent::Finished(buffer)).is_err() {
            tracing::warn!("capture finished but nobody is listening for it");
        }
        Ok(())
    }

    async fn flush(active: ActiveCapture) -> Result<Vec<u8>> {
        let ActiveCapture {
            stopper,
            mut collector,
            format,
        } = active;

        if let Err(e) = stopper.stop() {
            tracing::warn!("failed to stop capture device cleanly: {}", e);
        }

        let fragments = match tokio::time::timeout(FLUSH_TIMEOUT, &mut collector).await {
            Ok(Ok(fragments)) => fragments,
            Ok(Err(e)) => {
                return Err(AvatalkError::DeviceUnavailable {
                    message: format!("capture collector failed: {}", e),
                });
            }
            Err(_) => {
                collector.abort();
                return Err(AvatalkError::DeviceUnavailable {
                    message: "capture stream did not close after stop".to_string(),
                });
            }
        };

        let buffer = fragments.concat();
        match format {
            Some(format) if !buffer.is_empty() => wav::encode_pcm16(&buffer, format),
            _ => Ok(buffer),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.stopper.stop() {
                tracing::warn!("failed to release capture device: {}", e);
            }
            active.collector.abort();
        }
    }
}
