//! Error types for avatalk.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A sequential step of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Transcription,
    Completion,
    Synthesis,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Transcription => "transcription",
            Stage::Completion => "completion",
            Stage::Synthesis => "synthesis",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Why a service call produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFailure {
    /// The request never produced a response (connect, TLS, body decode).
    Request(String),
    /// The service answered with a non-success status.
    Status { code: u16, body: String },
    /// The completion service answered without any reply text.
    EmptyReply,
    /// The stage exceeded its configured time budget.
    Timeout(Duration),
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFailure::Request(message) => write!(f, "{}", message),
            ServiceFailure::Status { code, body } if body.is_empty() => {
                write!(f, "HTTP {}", code)
            }
            ServiceFailure::Status { code, body } => write!(f, "HTTP {}: {}", code, body),
            ServiceFailure::EmptyReply => f.write_str("empty reply"),
            ServiceFailure::Timeout(limit) => write!(f, "timed out after {:?}", limit),
        }
    }
}

#[derive(Error, Debug)]
pub enum AvatalkError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Capture errors
    #[error("Microphone unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Already recording")]
    AlreadyRecording,

    // Turn pipeline errors
    #[error("{stage} cancelled")]
    StageCancelled { stage: Stage },

    #[error("{stage} service failed: {reason}")]
    Service { stage: Stage, reason: ServiceFailure },

    // Renderer errors
    #[error("Renderer connection failed: {message}")]
    RendererConnectionFailed { message: String },

    #[error("Renderer error: {message}")]
    Renderer { message: String },

    // Session persistence errors
    #[error("Session store error: {message}")]
    Session { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AvatalkError {
    /// Shorthand for a service failure at `stage`.
    pub fn service(stage: Stage, reason: ServiceFailure) -> Self {
        AvatalkError::Service { stage, reason }
    }

    /// True for a superseded or explicitly cancelled stage.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AvatalkError::StageCancelled { .. })
    }

    /// True when the conversation cannot continue without a restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AvatalkError::RendererConnectionFailed { .. })
    }

    /// The message shown to the user, or `None` for errors that stay silent.
    pub fn user_message(&self) -> Option<String> {
        match self {
            AvatalkError::StageCancelled { .. } => None,
            AvatalkError::DeviceUnavailable { .. } => Some(
                "Error accessing microphone. Please check your permissions and try again."
                    .to_string(),
            ),
            AvatalkError::Service {
                stage: Stage::Transcription,
                ..
            } => Some("Error transcribing audio. Please try again.".to_string()),
            AvatalkError::Service { .. } => Some("An error occurred. Please try again.".to_string()),
            AvatalkError::RendererConnectionFailed { .. } => {
                Some("Failed to connect to the avatar renderer. Please restart.".to_string())
            }
            other => Some(other.to_string()),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AvatalkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = AvatalkError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = AvatalkError::ConfigInvalidValue {
            key: "pipeline.frame_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.frame_size: must be positive"
        );
    }

    #[test]
    fn test_device_unavailable_display() {
        let error = AvatalkError::DeviceUnavailable {
            message: "permission denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_service_error_display() {
        let error = AvatalkError::service(
            Stage::Synthesis,
            ServiceFailure::Status {
                code: 401,
                body: "bad key".to_string(),
            },
        );
        assert_eq!(
            error.to_string(),
            "synthesis service failed: HTTP 401: bad key"
        );

        let empty = AvatalkError::service(Stage::Completion, ServiceFailure::EmptyReply);
        assert_eq!(empty.to_string(), "completion service failed: empty reply");
    }

    #[test]
    fn test_timeout_display() {
        let error = AvatalkError::service(
            Stage::Transcription,
            ServiceFailure::Timeout(Duration::from_secs(2)),
        );
        assert_eq!(
            error.to_string(),
            "transcription service failed: timed out after 2s"
        );
    }

    #[test]
    fn test_cancellation_is_silent() {
        let error = AvatalkError::StageCancelled {
            stage: Stage::Completion,
        };
        assert!(error.is_cancellation());
        assert!(!error.is_fatal());
        assert_eq!(error.user_message(), None);
    }

    #[test]
    fn test_renderer_connection_failure_is_fatal() {
        let error = AvatalkError::RendererConnectionFailed {
            message: "ice failed".to_string(),
        };
        assert!(error.is_fatal());
        assert!(error.user_message().is_some());
    }

    #[test]
    fn test_transcription_failure_has_dedicated_message() {
        let error = AvatalkError::service(
            Stage::Transcription,
            ServiceFailure::Request("connection reset".to_string()),
        );
        assert_eq!(
            error.user_message().as_deref(),
            Some("Error transcribing audio. Please try again.")
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: AvatalkError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: AvatalkError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AvatalkError>();
        assert_sync::<AvatalkError>();
    }
}
