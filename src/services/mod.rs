//! Hosted collaborators of a turn: transcription, completion and synthesis.
//!
//! Each is a single request/response call that takes the turn's cancellation
//! token explicitly.

pub mod completion;
pub mod http;
mod mock;
pub mod synthesis;
pub mod transcription;

pub use completion::{ChatCompletion, CompletionClient, MockCompletion};
pub use synthesis::{ElevenLabsSynthesis, MockSynthesis, SynthesisClient};
pub use transcription::{MockTranscription, OpenAiTranscription, TranscriptionClient};
