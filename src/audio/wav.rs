//! WAV container for captured PCM.
//!
//! The transcription service needs a real audio file, so raw little-endian
//! 16-bit PCM from the microphone is wrapped before upload.

use crate::defaults::SAMPLE_RATE;
use crate::error::{AvatalkError, Result};
use std::io::Cursor;

/// Layout of raw 16-bit little-endian PCM bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Wrap raw PCM bytes in a WAV container.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn encode_pcm16(bytes: &[u8], format: PcmFormat) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + bytes.len()));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    for pair in bytes.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    Ok(cursor.into_inner())
}

/// Serialize samples as little-endian PCM bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

fn wav_error(e: hound::Error) -> AvatalkError {
    AvatalkError::DeviceUnavailable {
        message: format!("Failed to encode WAV: {}", e),
    }
}
