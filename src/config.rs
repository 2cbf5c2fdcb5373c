use crate::defaults;
use crate::error::{AvatalkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub renderer: RendererSection,
    pub transcription: TranscriptionSection,
    pub completion: CompletionSection,
    pub synthesis: SynthesisSection,
    pub pipeline: PipelineSection,
    pub session: SessionSection,
}

/// Avatar renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererSection {
    pub api_key: String,
    pub face_id: String,
    pub handle_silence: bool,
    /// Send one frame of silence once connected so the avatar starts idling.
    pub prime_silence: bool,
    pub audio_sink: Option<PathBuf>,
    pub video_sink: Option<PathBuf>,
}

/// Speech-to-text service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionSection {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

/// Language model configuration.
///
/// `agent_id` switches the same chat endpoint to an agent deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionSection {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub agent_id: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisSection {
    pub endpoint: String,
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
}

/// Turn pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    pub frame_size: usize,
    pub stage_timeout_ms: u64,
}

/// Session identity persistence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SessionSection {
    /// Where the session ids are stored; defaults to the data directory.
    pub path: Option<PathBuf>,
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            face_id: defaults::DEFAULT_FACE_ID.to_string(),
            handle_silence: true,
            prime_silence: true,
            audio_sink: None,
            video_sink: None,
        }
    }
}

impl Default for TranscriptionSection {
    fn default() -> Self {
        Self {
            endpoint: defaults::OPENAI_ENDPOINT.to_string(),
            api_key: String::new(),
            model: defaults::DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            endpoint: defaults::OPENAI_ENDPOINT.to_string(),
            api_key: String::new(),
            model: defaults::DEFAULT_COMPLETION_MODEL.to_string(),
            agent_id: None,
        }
    }
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            endpoint: defaults::ELEVENLABS_ENDPOINT.to_string(),
            api_key: String::new(),
            voice_id: defaults::DEFAULT_VOICE_ID.to_string(),
            model_id: defaults::DEFAULT_SYNTHESIS_MODEL.to_string(),
            output_format: defaults::SYNTHESIS_OUTPUT_FORMAT.to_string(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            frame_size: defaults::FRAME_SIZE,
            stage_timeout_ms: defaults::STAGE_TIMEOUT_MS,
        }
    }
}

impl PipelineSection {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AvatalkError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                AvatalkError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(AvatalkError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.frame_size == 0 {
            return Err(AvatalkError::ConfigInvalidValue {
                key: "pipeline.frame_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.pipeline.stage_timeout_ms == 0 {
            return Err(AvatalkError::ConfigInvalidValue {
                key: "pipeline.stage_timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - AVATALK_RENDERER_KEY → renderer.api_key
    /// - AVATALK_FACE_ID → renderer.face_id
    /// - AVATALK_OPENAI_KEY → transcription.api_key and completion.api_key
    /// - AVATALK_COMPLETION_ENDPOINT → completion.endpoint
    /// - AVATALK_AGENT_ID → completion.agent_id
    /// - AVATALK_ELEVENLABS_KEY → synthesis.api_key
    /// - AVATALK_VOICE_ID → synthesis.voice_id
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = env_value("AVATALK_RENDERER_KEY") {
            self.renderer.api_key = key;
        }

        if let Some(face) = env_value("AVATALK_FACE_ID") {
            self.renderer.face_id = face;
        }

        if let Some(key) = env_value("AVATALK_OPENAI_KEY") {
            self.transcription.api_key = key.clone();
            self.completion.api_key = key;
        }

        if let Some(endpoint) = env_value("AVATALK_COMPLETION_ENDPOINT") {
            self.completion.endpoint = endpoint;
        }

        if let Some(agent) = env_value("AVATALK_AGENT_ID") {
            self.completion.agent_id = Some(agent);
        }

        if let Some(key) = env_value("AVATALK_ELEVENLABS_KEY") {
            self.synthesis.api_key = key;
        }

        if let Some(voice) = env_value("AVATALK_VOICE_ID") {
            self.synthesis.voice_id = voice;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/avatalk/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("avatalk")
            .join("config.toml")
    }

    /// Copy with every credential masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for key in [
            &mut config.renderer.api_key,
            &mut config.transcription.api_key,
            &mut config.completion.api_key,
            &mut config.synthesis.api_key,
        ] {
            if !key.is_empty() {
                *key = "***".to_string();
            }
        }
        config
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AvatalkError::Other(e.to_string()))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_avatalk_env() {
        for key in [
            "AVATALK_RENDERER_KEY",
            "AVATALK_FACE_ID",
            "AVATALK_OPENAI_KEY",
            "AVATALK_COMPLETION_ENDPOINT",
            "AVATALK_AGENT_ID",
            "AVATALK_ELEVENLABS_KEY",
            "AVATALK_VOICE_ID",
        ] {
            remove_env(key);
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.renderer.face_id, defaults::DEFAULT_FACE_ID);
        assert!(config.renderer.handle_silence);
        assert!(config.renderer.prime_silence);
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.completion.agent_id, None);
        assert_eq!(config.transcription.model, "whisper-1");
        assert_eq!(config.synthesis.output_format, "pcm_16000");
        assert_eq!(config.pipeline.frame_size, 6000);
        assert_eq!(config.pipeline.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.session.path, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [renderer]
            api_key = "rk"
            face_id = "face-1"
            handle_silence = false
            audio_sink = "/tmp/avatar.pcm"

            [completion]
            endpoint = "https://agents.example.com/v1"
            agent_id = "agent-7"

            [synthesis]
            voice_id = "voice-2"

            [pipeline]
            frame_size = 3200
            stage_timeout_ms = 5000
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.renderer.api_key, "rk");
        assert_eq!(config.renderer.face_id, "face-1");
        assert!(!config.renderer.handle_silence);
        assert_eq!(
            config.renderer.audio_sink,
            Some(PathBuf::from("/tmp/avatar.pcm"))
        );
        assert_eq!(config.completion.endpoint, "https://agents.example.com/v1");
        assert_eq!(config.completion.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.synthesis.voice_id, "voice-2");
        assert_eq!(config.pipeline.frame_size, 3200);
        assert_eq!(config.pipeline.stage_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_frame_size_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[pipeline]\nframe_size = 0\n")
            .unwrap();

        match Config::load(temp_file.path()) {
            Err(AvatalkError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "pipeline.frame_size");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_override_openai_key_sets_both_services() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_avatalk_env();

        set_env("AVATALK_OPENAI_KEY", "sk-test");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.transcription.api_key, "sk-test");
        assert_eq!(config.completion.api_key, "sk-test");
        assert_eq!(config.synthesis.api_key, "");

        clear_avatalk_env();
    }

    #[test]
    fn test_env_override_agent_and_voice() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_avatalk_env();

        set_env("AVATALK_AGENT_ID", "agent-1");
        set_env("AVATALK_VOICE_ID", "voice-9");
        set_env("AVATALK_FACE_ID", "face-3");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.completion.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(config.synthesis.voice_id, "voice-9");
        assert_eq!(config.renderer.face_id, "face-3");

        clear_avatalk_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_avatalk_env();

        set_env("AVATALK_VOICE_ID", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.synthesis.voice_id, defaults::DEFAULT_VOICE_ID);

        clear_avatalk_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[renderer\nface_id = \"broken").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_avatalk_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("avatalk"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_redacted_masks_only_set_keys() {
        let mut config = Config::default();
        config.completion.api_key = "sk-secret".to_string();

        let redacted = config.redacted();
        assert_eq!(redacted.completion.api_key, "***");
        assert_eq!(redacted.synthesis.api_key, "");
        assert_eq!(redacted.completion.model, config.completion.model);
        assert!(!redacted.to_toml().unwrap().contains("sk-secret"));
    }

    #[test]
    fn test_to_toml_roundtrips_through_load() {
        let mut config = Config::default();
        config.completion.agent_id = Some("agent-x".to_string());
        let rendered = config.to_toml().unwrap();

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(rendered.as_bytes()).unwrap();

        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }
}
