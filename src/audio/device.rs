use crate::audio::wav::PcmFormat;
use crate::error::{AvatalkError, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Trait for microphone-like capture devices.
///
/// This trait allows swapping implementations (real microphone vs mock).
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Ask the host for a live capture stream.
    ///
    /// Fragments arrive on the returned channel in capture order until the
    /// stream is stopped, after which the device closes the channel.
    ///
    /// # Errors
    /// Returns `DeviceUnavailable` if the host denies access or has no device.
    async fn acquire(&self) -> Result<CaptureStream>;

    /// Human-readable device name
    fn name(&self) -> &str;
}

/// Stops a live capture stream.
pub trait StreamStopper: Send {
    /// Stop capturing. The device delivers any fragment still pending and then
    /// closes the fragment channel.
    fn stop(self: Box<Self>) -> Result<()>;
}

/// A live capture stream handed out by a [`CaptureDevice`].
pub struct CaptureStream {
    /// Captured fragments in arrival order.
    pub fragments: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Raw PCM layout, or `None` when fragments already form a container file.
    pub format: Option<PcmFormat>,
    pub stopper: Box<dyn StreamStopper>,
}

/// Scriptable capture device for testing.
///
/// Fragments are fed with [`MockMicrophone::push`] while a stream is live;
/// `with_trailing` queues one fragment delivered when the stream stops.
#[derive(Debug, Clone, Default)]
pub struct MockMicrophone {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    trailing: Option<Vec<u8>>,
    format: Option<PcmFormat>,
    deny: bool,
}

impl MockMicrophone {
    /// Create a mock microphone delivering opaque fragments
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver raw PCM instead of opaque container fragments
    pub fn with_pcm_format(mut self, format: PcmFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Deliver one last fragment when the stream is stopped
    pub fn with_trailing(mut self, fragment: Vec<u8>) -> Self {
        self.trailing = Some(fragment);
        self
    }

    /// Configure the mock to refuse access
    pub fn with_denied_access(mut self) -> Self {
        self.deny = true;
        self
    }

    /// Feed a fragment into the live stream. Returns false when no stream is live.
    pub fn push(&self, fragment: &[u8]) -> bool {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .is_some_and(|tx| tx.send(fragment.to_vec()).is_ok())
    }

    /// True while a stream is live
    pub fn is_live(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

struct MockStopper {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    trailing: Option<Vec<u8>>,
}

impl StreamStopper for MockStopper {
    fn stop(self: Box<Self>) -> Result<()> {
        let tx = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let (Some(tx), Some(fragment)) = (tx, self.trailing)
            && tx.send(fragment).is_err()
        {
            tracing::debug!("mock microphone stopped after its receiver was dropped");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CaptureDevice for MockMicrophone {
    async fn acquire(&self) -> Result<CaptureStream> {
        if self.deny {
            return Err(AvatalkError::DeviceUnavailable {
                message: "permission denied".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        Ok(CaptureStream {
            fragments: rx,
            format: self.format,
            stopper: Box::new(MockStopper {
                sender: Arc::clone(&self.sender),
                trailing: self.trailing.clone(),
            }),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_delivers_pushed_fragments_in_order() {
        let mic = MockMicrophone::new();
        let mut stream = mic.acquire().await.unwrap();

        assert!(mic.push(&[1, 2]));
        assert!(mic.push(&[3]));
        stream.stopper.stop().unwrap();

        assert_eq!(stream.fragments.recv().await, Some(vec![1, 2]));
        assert_eq!(stream.fragments.recv().await, Some(vec![3]));
        assert_eq!(stream.fragments.recv().await, None);
    }

    #[tokio::test]
    async fn test_mock_push_without_stream_is_rejected() {
        let mic = MockMicrophone::new();
        assert!(!mic.push(&[1]));
        assert!(!mic.is_live());
    }

    #[tokio::test]
    async fn test_mock_trailing_fragment_arrives_on_stop() {
        let mic = MockMicrophone::new().with_trailing(vec![9]);
        let mut stream = mic.acquire().await.unwrap();
        assert!(mic.is_live());

        stream.stopper.stop().unwrap();

        assert!(!mic.is_live());
        assert_eq!(stream.fragments.recv().await, Some(vec![9]));
        assert_eq!(stream.fragments.recv().await, None);
    }

    #[tokio::test]
    async fn test_mock_denied_access() {
        let mic = MockMicrophone::new().with_denied_access();
        match mic.acquire().await {
            Err(AvatalkError::DeviceUnavailable { message }) => {
                assert_eq!(message, "permission denied");
            }
            _ => panic!("Expected DeviceUnavailable error"),
        }
    }

    #[tokio::test]
    async fn test_capture_device_trait_is_object_safe() {
        let device: Arc<dyn CaptureDevice> =
            Arc::new(MockMicrophone::new().with_pcm_format(PcmFormat::default()));
        let stream = device.acquire().await.unwrap();
        assert_eq!(stream.format, Some(PcmFormat::default()));
        assert_eq!(device.name(), "mock");
    }
}
