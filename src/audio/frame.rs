//! Fixed-size framing of synthesized audio for renderer delivery.

/// A bounded slice of reply audio, numbered from 0 within its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
    /// Raw PCM bytes; only the last frame of a buffer may be shorter than the maximum.
    pub bytes: Vec<u8>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, bytes: Vec<u8>) -> Self {
        Self { sequence, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Duration of this frame in milliseconds for 16-bit mono PCM.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        ((self.bytes.len() as u64 / 2 * 1000) / sample_rate as u64) as u32
    }
}

/// Split `buffer` into frames of at most `max_frame_size` bytes.
///
/// Frame `i` holds `buffer[i * max .. min((i + 1) * max, len)]`, so the frame
/// count is `ceil(len / max)` and an empty buffer yields no frames.
///
/// # Panics
/// Panics if `max_frame_size` is zero.
pub fn split(buffer: &[u8], max_frame_size: usize) -> Vec<AudioFrame> {
    assert!(max_frame_size > 0, "frame size must be positive");
    buffer
        .chunks(max_frame_size)
        .enumerate()
        .map(|(i, chunk)| AudioFrame::new(i as u64, chunk.to_vec()))
        .collect()
}
