//! Voice processing module
//!
//! Uniform recognition and synthesis adapters over two speech capabilities:
//! a hosted one (browser-style speech APIs living in an embedding host, see
//! [`hosted`]) and a device one (local microphone and speakers with cloud
//! STT/TTS providers, see [`device`]). The conversation engine only ever sees
//! the [`Recognizer`] and [`Synthesizer`] traits.

mod capture;
pub mod device;
pub mod hosted;
mod normalize;
mod playback;
mod segmenter;
mod selector;
mod stt;
mod tts;
mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

pub use capture::{AudioCapture, SAMPLE_RATE, probe_input, samples_to_wav};
pub use device::{DeviceRecognizer, DeviceSynthesizer};
pub use hosted::{
    HostCommand, HostEvent, HostEvents, HostLink, HostedRecognizer, HostedSynthesizer,
    encode_command,
};
pub use normalize::normalize;
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, probe_output, test_tone};
pub use segmenter::{ENERGY_THRESHOLD, SegmentEvent, SpeechSegmenter, calculate_energy};
pub use selector::{VoiceSelector, pick_default};
pub use stt::{STT_REQUEST_TIMEOUT, SpeechToText};
pub use tts::{TTS_REQUEST_TIMEOUT, TextToSpeech};
pub use watchdog::{SYNTHESIS_START_TIMEOUT, await_playback, await_render};

use crate::Result;
use crate::config::{Config, SttProvider, TtsProvider};

/// Why a recognition session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Microphone access refused; terminal for the conversation
    PermissionDenied,
    /// Listening ended without any speech; benign
    NoSpeech,
    /// Anything else the platform reported
    Other(String),
}

impl RecognitionErrorKind {
    /// Whether the error ends the conversation instead of a quiet restart
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoSpeech)
    }
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "microphone permission denied"),
            Self::NoSpeech => write!(f, "no speech detected"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Event reported by a recognition adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The platform confirmed listening began
    ListeningStarted,
    /// A completed utterance (interim hypotheses never surface)
    FinalTranscript(String),
    /// Voice activity began
    SpeechStarted,
    /// Voice activity ended
    SpeechEnded,
    /// Recognition failed
    Error(RecognitionErrorKind),
}

/// Channel a recognition adapter reports its events into
pub type RecognitionSink = mpsc::UnboundedSender<RecognitionEvent>;

/// Options for a listening session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// BCP-47 language tag (e.g. "en-US")
    pub language: String,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
        }
    }
}

/// Continuous speech-to-text capability
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Ask the platform for microphone access
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot be queried
    async fn request_permission(&self) -> Result<bool>;

    /// Begin continuous listening, reporting into `sink`
    ///
    /// A no-op when already listening.
    ///
    /// # Errors
    ///
    /// Returns error if listening cannot begin
    async fn start(&self, options: &RecognitionOptions, sink: RecognitionSink) -> Result<()>;

    /// Stop listening; a no-op when not listening
    ///
    /// # Errors
    ///
    /// Returns error if the platform rejects the stop request
    async fn stop(&self) -> Result<()>;

    /// Whether a listening session is live
    fn is_listening(&self) -> bool;
}

/// Voice gender as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Female,
    Male,
    Neutral,
}

/// Platform metadata about one synthesis voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDescriptor {
    /// Identifier passed back to the platform when speaking
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// BCP-47 language tag
    pub language: String,
    /// On-device voice (as opposed to a network voice)
    #[serde(default)]
    pub local: bool,
    /// Gender, when the platform reports one
    #[serde(default)]
    pub gender: Option<VoiceGender>,
}

impl VoiceDescriptor {
    /// Whether the descriptor explicitly marks the voice as male
    #[must_use]
    pub fn is_marked_male(&self) -> bool {
        self.gender == Some(VoiceGender::Male)
            || self
                .name
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word.eq_ignore_ascii_case("male"))
    }
}

/// Options for a single utterance
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    /// Speaking rate multiplier
    pub rate: f32,
    /// Pitch multiplier
    pub pitch: f32,
    /// Volume in `0.0..=1.0`
    pub volume: f32,
    /// BCP-47 language tag
    pub language: String,
    /// Explicit voice override
    pub voice_id: Option<String>,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            language: "en-US".to_string(),
            voice_id: None,
        }
    }
}

/// How an utterance ended
///
/// Synthesis never fails the conversation: every path resolves to an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Played to the end
    Completed,
    /// Stopped before the end
    Cancelled,
    /// The platform never confirmed playback start
    TimedOut,
    /// No synthesis capability available
    Unavailable,
    /// The platform refused or failed the utterance
    Degraded(String),
}

impl SpeakOutcome {
    /// Whether the user actually heard the full utterance
    #[must_use]
    pub const fn was_heard(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Text-to-speech capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Ask the platform for audio output access
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot be queried
    async fn request_permission(&self) -> Result<bool> {
        Ok(true)
    }

    /// Whether playback is blocked until a user gesture has happened
    fn requires_user_gesture(&self) -> bool {
        false
    }

    /// Speak `text`, resolving when playback ends or the start watchdog fires
    async fn speak(&self, text: &str, options: &SpeakOptions) -> SpeakOutcome;

    /// Cancel any in-flight utterance; idempotent
    ///
    /// # Errors
    ///
    /// Returns error if the platform rejects the cancel request
    async fn stop(&self) -> Result<()>;

    /// Currently known voice catalogue (may be empty until populated)
    async fn list_voices(&self) -> Vec<VoiceDescriptor>;

    /// Notifications fired whenever the voice catalogue changes
    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Which speech capability backs the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Browser-style speech APIs reached through a host bridge
    Hosted,
    /// Local microphone/speakers with cloud STT/TTS
    #[default]
    Device,
}

impl Backend {
    /// Parse a backend name (`hosted`/`browser`, `device`/`native`)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "hosted" | "browser" | "web" => Some(Self::Hosted),
            "device" | "native" => Some(Self::Device),
            _ => None,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hosted => write!(f, "hosted"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// A recognizer/synthesizer pair selected for one process
pub struct SpeechStack {
    pub recognizer: Arc<dyn Recognizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Host side of the bridge, present for the hosted backend
    pub host_link: Option<HostLink>,
}

impl std::fmt::Debug for SpeechStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechStack")
            .field("recognizer", &self.recognizer.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("host_link", &self.host_link.is_some())
            .finish()
    }
}

impl SpeechStack {
    /// Build the adapter pair for `backend`
    ///
    /// # Errors
    ///
    /// Returns error if the device backend is missing provider credentials
    pub fn build(backend: Backend, config: &Config) -> Result<Self> {
        match backend {
            Backend::Hosted => {
                let (recognizer, synthesizer, link) = hosted::connect(
                    &config.host,
                    config.conversation.synthesis_start_timeout,
                );
                tracing::info!("using hosted speech backend");
                Ok(Self {
                    recognizer: Arc::new(recognizer),
                    synthesizer: Arc::new(synthesizer),
                    host_link: Some(link),
                })
            }
            Backend::Device => {
                let stt = build_stt(config)?;
                let tts = build_tts(config)?;
                tracing::info!(
                    stt = ?config.stt.provider,
                    tts = ?config.tts.provider,
                    "using device speech backend"
                );
                Ok(Self {
                    recognizer: Arc::new(DeviceRecognizer::new(stt, config.device.clone())),
                    synthesizer: Arc::new(DeviceSynthesizer::new(
                        tts,
                        config.tts.timeout,
                        config.conversation.synthesis_start_timeout,
                    )),
                    host_link: None,
                })
            }
        }
    }
}

/// Build the STT client for the configured provider
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_stt(config: &Config) -> Result<SpeechToText> {
    let stt = match config.stt.provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.stt.model.clone(),
        ),
        SttProvider::Deepgram => SpeechToText::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            config.stt.model.clone(),
        ),
    }?;
    Ok(stt.with_timeout(config.stt.timeout))
}

/// Build the TTS client for the configured provider
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_tts(config: &Config) -> Result<TextToSpeech> {
    let tts = match config.tts.provider {
        TtsProvider::OpenAI => TextToSpeech::new_openai_with_model(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.tts.voice.clone(),
            config.tts.model.clone(),
        ),
        TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs_with_model(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            config.tts.voice.clone(),
            config.tts.model.clone(),
        ),
    }?;
    Ok(tts.with_timeout(config.tts.timeout))
}

/// HTTP client whose requests give up after `timeout`
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(name: &str, gender: Option<VoiceGender>) -> VoiceDescriptor {
        VoiceDescriptor {
            id: name.to_lowercase(),
            name: name.to_string(),
            language: "en-US".to_string(),
            local: true,
            gender,
        }
    }

    #[test]
    fn test_marked_male() {
        assert!(voice("Alex", Some(VoiceGender::Male)).is_marked_male());
        assert!(voice("Google UK English Male", None).is_marked_male());
        assert!(!voice("Google UK English Female", None).is_marked_male());
        assert!(!voice("Samantha", None).is_marked_male());
    }

    #[test]
    fn test_backend_from_name() {
        assert_eq!(Backend::from_name("browser"), Some(Backend::Hosted));
        assert_eq!(Backend::from_name(" Native "), Some(Backend::Device));
        assert_eq!(Backend::from_name("carrier pigeon"), None);
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(RecognitionErrorKind::PermissionDenied.is_fatal());
        assert!(!RecognitionErrorKind::NoSpeech.is_fatal());
        assert!(RecognitionErrorKind::Other("network".to_string()).is_fatal());
    }
}
