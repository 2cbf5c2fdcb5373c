//! avatalk - Talk to a lip-synced avatar
//!
//! Speech or text in, a synthesized spoken reply streamed to an avatar renderer
//! out. Each exchange is a turn; a newer turn supersedes the one in flight.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod renderer;
pub mod services;
pub mod session;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root
#[cfg(feature = "cli")]
pub mod app;

// Seams (capture → services → renderer)
pub use audio::capture::{CaptureController, CaptureEvent, CaptureState};
pub use audio::device::{CaptureDevice, MockMicrophone};
pub use renderer::{CollectorRenderer, RendererEvent, RendererFacade, RendererState};
pub use services::{
    CompletionClient, MockCompletion, MockSynthesis, MockTranscription, SynthesisClient,
    TranscriptionClient,
};

// Pipeline
pub use pipeline::{PipelineConfig, Services, StatusBoard, Turn, TurnPipeline, TurnStatus};

// Error handling
pub use error::{AvatalkError, Result};

// Config
pub use config::Config;
pub use session::Session;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(
                hash_part.len(),
                7,
                "Git hash should be 7 chars, got: {}",
                hash_part
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
