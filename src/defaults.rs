//! Default configuration constants for avatalk.
//!
//! Shared by the configuration types and the pipeline so that every layer
//! agrees on the audio format the renderer expects.

/// Sample rate of synthesized reply audio in Hz.
///
/// The renderer consumes 16-bit PCM at 16kHz; synthesis is requested in that format.
pub const SAMPLE_RATE: u32 = 16000;

/// Maximum number of bytes in one frame sent to the renderer.
pub const FRAME_SIZE: usize = 6000;

/// Per-stage time budget for transcription, completion and synthesis calls.
pub const STAGE_TIMEOUT_MS: u64 = 30_000;

/// Avatar face rendered when none is configured.
pub const DEFAULT_FACE_ID: &str = "13fbb3e1-4489-4199-ad57-91be4a2dd38b";

/// Synthesis voice used when none is configured.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Synthesis model identifier.
pub const DEFAULT_SYNTHESIS_MODEL: &str = "eleven_multilingual_v1";

/// Output format requested from the synthesis service (raw PCM, 16kHz).
pub const SYNTHESIS_OUTPUT_FORMAT: &str = "pcm_16000";

/// Chat model used for replies.
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";

/// Transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

pub const ELEVENLABS_ENDPOINT: &str = "https://api.elevenlabs.io";

/// File name the captured audio is uploaded under.
pub const UPLOAD_FILE_NAME: &str = "audio.wav";
