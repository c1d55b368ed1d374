//! TOML configuration file loading
//!
//! Supports `~/.config/voiceloop/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceloopConfigFile {
    /// Speech backend ("device" or "hosted")
    #[serde(default)]
    pub backend: Option<String>,

    /// BCP-47 language for recognition and synthesis
    #[serde(default)]
    pub language: Option<String>,

    /// Turn-taking timings
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Synthesis voice and prosody
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Speech-to-text provider
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech provider
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Reply generator endpoint
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Hosted backend bridge
    #[serde(default)]
    pub host: HostFileConfig,

    /// Device backend audio
    #[serde(default)]
    pub device: DeviceFileConfig,
}

/// Turn-taking timings, in milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    pub no_speech_restart_ms: Option<u64>,
    pub resume_after_speech_ms: Option<u64>,
    pub synthesis_start_timeout_ms: Option<u64>,
}

/// Synthesis voice and prosody
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Voice name or id to pin instead of the automatic pick
    pub voice: Option<String>,

    /// Voice names preferred by the automatic pick, best first
    pub preferred_voices: Option<Vec<String>>,

    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Bound on one transcription request
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// Provider voice used when no voice is selected
    pub voice: Option<String>,

    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,

    /// Messages of history kept per session
    pub max_history: Option<usize>,

    pub timeout_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub chat: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HostFileConfig {
    pub permission_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceFileConfig {
    /// RMS level that counts as speech
    pub energy_threshold: Option<f32>,
    pub no_speech_timeout_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceloopConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceloopConfigFile {
    let Some(path) = config_file_path() else {
        return VoiceloopConfigFile::default();
    };

    if !path.exists() {
        return VoiceloopConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            VoiceloopConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<VoiceloopConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/voiceloop/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voiceloop").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let file: VoiceloopConfigFile = toml::from_str(
            r#"
            backend = "hosted"

            [speech]
            voice = "Samantha"
            rate = 1.1

            [conversation]
            no_speech_restart_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(file.backend.as_deref(), Some("hosted"));
        assert_eq!(file.speech.voice.as_deref(), Some("Samantha"));
        assert_eq!(file.conversation.no_speech_restart_ms, Some(1500));
        assert!(file.stt.provider.is_none());
        assert!(file.api_keys.openai.is_none());
    }

    #[test]
    fn test_read_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = [").unwrap();
        assert!(read_config_file(&path).is_err());
    }
}
