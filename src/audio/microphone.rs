//! Real microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! The cpal stream is not `Send`, so each capture session owns a dedicated
//! thread that builds the stream, forwards 16-bit mono 16kHz PCM fragments and
//! tears the stream down when told to stop.

use crate::audio::device::{CaptureDevice, CaptureStream, StreamStopper};
use crate::audio::wav::{self, PcmFormat};
use crate::defaults;
use crate::error::{AvatalkError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::thread;
use tokio::sync::mpsc;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers when
/// probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let devices = host
                .input_devices()
                .map_err(|e| AvatalkError::DeviceUnavailable {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(AvatalkError::DeviceUnavailable {
                message: format!("Audio device not found: {}", name),
            });
        }

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| AvatalkError::DeviceUnavailable {
                message: "no default input device".to_string(),
            })
    })
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn to_mono_16khz(samples: &[i16], channels: usize, source_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };
    wav::resample(&mono, source_rate, defaults::SAMPLE_RATE)
}

fn f32_to_i16(data: &[f32]) -> Vec<i16> {
    data.iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Build an input stream at the device's native config, converting in software.
fn build_stream(
    device: &cpal::Device,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<cpal::Stream> {
    use cpal::SampleFormat;

    let default_config =
        device
            .default_input_config()
            .map_err(|e| AvatalkError::DeviceUnavailable {
                message: format!("Failed to query default input config: {}", e),
            })?;

    let native_rate = default_config.sample_rate().0;
    let native_channels = default_config.channels() as usize;
    let stream_config: cpal::StreamConfig = default_config.clone().into();

    tracing::debug!(
        channels = native_channels,
        rate = native_rate,
        format = ?default_config.sample_format(),
        "opening microphone"
    );

    let err_callback = |err| {
        tracing::warn!("Audio stream error: {}", err);
    };

    let stream = match default_config.sample_format() {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mono = to_mono_16khz(data, native_channels, native_rate);
                if tx.send(wav::samples_to_bytes(&mono)).is_err() {
                    tracing::trace!("fragment dropped after capture stopped");
                }
            },
            err_callback,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = to_mono_16khz(&f32_to_i16(data), native_channels, native_rate);
                if tx.send(wav::samples_to_bytes(&mono)).is_err() {
                    tracing::trace!("fragment dropped after capture stopped");
                }
            },
            err_callback,
            None,
        ),
        fmt => {
            return Err(AvatalkError::DeviceUnavailable {
                message: format!("Unsupported native sample format: {:?}", fmt),
            });
        }
    };

    stream.map_err(|e| AvatalkError::DeviceUnavailable {
        message: format!("Failed to build input stream: {}", e),
    })
}

/// Default (or named) system microphone.
pub struct CpalMicrophone {
    device_name: Option<String>,
    label: String,
}

impl CpalMicrophone {
    /// # Arguments
    /// * `device_name` - Optional device name. If None, prefers PipeWire/PulseAudio, then the system default.
    pub fn new(device_name: Option<String>) -> Self {
        let label = device_name.clone().unwrap_or_else(|| "default".to_string());
        Self { device_name, label }
    }
}

struct CpalStopper {
    stop_tx: crossbeam_channel::Sender<()>,
}

impl StreamStopper for CpalStopper {
    fn stop(self: Box<Self>) -> Result<()> {
        // A closed channel means the capture thread already exited and released the stream.
        if self.stop_tx.send(()).is_err() {
            tracing::debug!("capture thread already gone");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CaptureDevice for CpalMicrophone {
    async fn acquire(&self) -> Result<CaptureStream> {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let device_name = self.device_name.clone();

        thread::Builder::new()
            .name("avatalk-mic".to_string())
            .spawn(move || {
                let opened = find_device(device_name.as_deref())
                    .and_then(|device| build_stream(&device, fragment_tx))
                    .and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| AvatalkError::DeviceUnavailable {
                                message: format!("Failed to start audio stream: {}", e),
                            })?;
                        Ok(stream)
                    });

                match opened {
                    Ok(stream) => {
                        if ready_tx.send(Ok(())).is_err() {
                            return;
                        }
                        // Blocks until stopped or the stopper is dropped
                        if stop_rx.recv().is_err() {
                            tracing::debug!("capture stopper dropped without stopping");
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        if ready_tx.send(Err(e)).is_err() {
                            tracing::debug!("microphone open abandoned");
                        }
                    }
                }
            })
            .map_err(|e| AvatalkError::DeviceUnavailable {
                message: format!("Failed to spawn capture thread: {}", e),
            })?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| AvatalkError::DeviceUnavailable {
                message: format!("capture thread join failed: {}", e),
            })?;

        match ready {
            Ok(Ok(())) => Ok(CaptureStream {
                fragments: fragment_rx,
                format: Some(PcmFormat::default()),
                stopper: Box::new(CpalStopper { stop_tx }),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AvatalkError::DeviceUnavailable {
                message: "capture thread exited before the stream opened".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let stereo = vec![100i16, 200, 300, 400];
        assert_eq!(to_mono_16khz(&stereo, 2, 16000), vec![150, 350]);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(&[2.0, -2.0, 0.0]), vec![i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn test_label_defaults_to_default() {
        assert_eq!(CpalMicrophone::new(None).name(), "default");
        assert_eq!(CpalMicrophone::new(Some("hw:1".to_string())).name(), "hw:1");
    }

    #[tokio::test]
    #[ignore] // Requires audio hardware
    async fn test_acquire_and_stop_default_device() {
        let mic = CpalMicrophone::new(None);
        let stream = mic.acquire().await.expect("Failed to open microphone");
        stream.stopper.stop().expect("Failed to stop");
    }
}
