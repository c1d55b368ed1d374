//! Configuration management for voiceloop
//!
//! Values resolve with precedence environment > config file > defaults.

pub mod file;

use std::time::Duration;

use crate::conversation::{EngineSettings, TurnTiming};
use crate::voice::{
    Backend, RecognitionOptions, STT_REQUEST_TIMEOUT, SYNTHESIS_START_TIMEOUT, SpeakOptions,
    TTS_REQUEST_TIMEOUT, VoiceSelector,
};
use crate::{Error, Result};
use file::VoiceloopConfigFile;

/// Default chat completions endpoint
const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1";

/// Default chat model
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Default system prompt for spoken replies
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Your replies are \
     spoken aloud, so keep them short and conversational and avoid lists, tables and code.";

/// Default bound on one chat completion request
const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `ElevenLabs` voice (Rachel)
const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// voiceloop configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Speech backend selected at startup
    pub backend: Backend,

    /// BCP-47 language for recognition and synthesis
    pub language: String,

    /// Turn-taking timings
    pub conversation: ConversationConfig,

    /// Synthesis voice and prosody
    pub speech: SpeechConfig,

    /// Speech-to-text provider (device backend)
    pub stt: SttConfig,

    /// Text-to-speech provider (device backend)
    pub tts: TtsConfig,

    /// Reply generator endpoint
    pub chat: ChatConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Hosted backend bridge
    pub host: HostConfig,

    /// Device backend audio
    pub device: DeviceConfig,
}

/// Turn-taking timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Delay before listening again after silence
    pub no_speech_restart: Duration,

    /// Delay before listening again after speaking
    pub resume_after_speech: Duration,

    /// How long synthesis may take to confirm playback began
    pub synthesis_start_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            no_speech_restart: Duration::from_millis(1000),
            resume_after_speech: Duration::from_millis(500),
            synthesis_start_timeout: SYNTHESIS_START_TIMEOUT,
        }
    }
}

/// Synthesis voice and prosody
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechConfig {
    /// Voice name or id pinned over the automatic pick
    pub voice: Option<String>,

    /// Preferred voice names, best first (empty = built-in list)
    pub preferred_voices: Vec<String>,

    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: None,
            preferred_voices: Vec::new(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl SttProvider {
    fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }

    const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAI => "nova",
            Self::ElevenLabs => DEFAULT_ELEVENLABS_VOICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,

    /// Bound on one transcription request
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,

    /// Provider voice used when no voice is selected
    pub voice: String,

    /// Bound on one synthesis request, including decoding its audio
    pub timeout: Duration,
}

/// Reply generator endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,

    /// Messages of history kept per session
    pub max_history: usize,

    /// Bound on one completion request
    pub timeout: Duration,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS and the default chat endpoint)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// Chat endpoint key, when it differs from the `OpenAI` key
    pub chat: Option<String>,
}

/// Hosted backend bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// How long the host may take to answer a microphone permission request
    pub permission_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            permission_timeout: Duration::from_secs(30),
        }
    }
}

/// Device backend audio configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// RMS level that counts as speech
    pub energy_threshold: f32,

    /// Listening ends with a no-speech error after this much silence
    pub no_speech_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            energy_threshold: crate::voice::ENERGY_THRESHOLD,
            no_speech_timeout: Duration::from_secs(8),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if a backend or provider name is not recognized
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a backend or provider name is not recognized
    pub fn resolve(
        fc: VoiceloopConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let backend = match env("VOICELOOP_BACKEND").or(fc.backend) {
            Some(name) => Backend::from_name(&name)
                .ok_or_else(|| Error::Config(format!("unknown backend: {name}")))?,
            None => Backend::default(),
        };

        let language = env("VOICELOOP_LANGUAGE")
            .or(fc.language)
            .unwrap_or_else(|| "en-US".to_string());

        let defaults = ConversationConfig::default();
        let conversation = ConversationConfig {
            no_speech_restart: fc
                .conversation
                .no_speech_restart_ms
                .map_or(defaults.no_speech_restart, Duration::from_millis),
            resume_after_speech: fc
                .conversation
                .resume_after_speech_ms
                .map_or(defaults.resume_after_speech, Duration::from_millis),
            synthesis_start_timeout: fc
                .conversation
                .synthesis_start_timeout_ms
                .map_or(defaults.synthesis_start_timeout, Duration::from_millis),
        };

        let speech = SpeechConfig {
            voice: env("VOICELOOP_VOICE").or(fc.speech.voice),
            preferred_voices: fc.speech.preferred_voices.unwrap_or_default(),
            rate: fc.speech.rate.unwrap_or(1.0),
            pitch: fc.speech.pitch.unwrap_or(1.0),
            volume: fc.speech.volume.unwrap_or(1.0).clamp(0.0, 1.0),
        };

        let stt_provider = fc
            .stt
            .provider
            .as_deref()
            .map(SttProvider::from_name)
            .transpose()?
            .unwrap_or_default();
        let stt = SttConfig {
            provider: stt_provider,
            model: env("VOICELOOP_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
            timeout: fc
                .stt
                .timeout_ms
                .map_or(STT_REQUEST_TIMEOUT, Duration::from_millis),
        };

        let tts_provider = fc
            .tts
            .provider
            .as_deref()
            .map(TtsProvider::from_name)
            .transpose()?
            .unwrap_or_default();
        let tts = TtsConfig {
            provider: tts_provider,
            model: env("VOICELOOP_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            voice: fc
                .tts
                .voice
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            timeout: fc
                .tts
                .timeout_ms
                .map_or(TTS_REQUEST_TIMEOUT, Duration::from_millis),
        };

        let chat = ChatConfig {
            base_url: env("VOICELOOP_CHAT_URL")
                .or(fc.chat.base_url)
                .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
            model: env("VOICELOOP_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            system_prompt: fc
                .chat
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_history: fc.chat.max_history.unwrap_or(20),
            timeout: fc
                .chat
                .timeout_ms
                .map_or(DEFAULT_CHAT_TIMEOUT, Duration::from_millis),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            chat: env("VOICELOOP_CHAT_API_KEY").or(fc.api_keys.chat),
        };

        let host = HostConfig {
            permission_timeout: fc
                .host
                .permission_timeout_ms
                .map_or(HostConfig::default().permission_timeout, Duration::from_millis),
        };

        let device_defaults = DeviceConfig::default();
        let device = DeviceConfig {
            energy_threshold: fc
                .device
                .energy_threshold
                .unwrap_or(device_defaults.energy_threshold),
            no_speech_timeout: fc
                .device
                .no_speech_timeout_ms
                .map_or(device_defaults.no_speech_timeout, Duration::from_millis),
        };

        Ok(Self {
            backend,
            language,
            conversation,
            speech,
            stt,
            tts,
            chat,
            api_keys,
            host,
            device,
        })
    }

    /// Key for the chat endpoint, falling back to the `OpenAI` key
    #[must_use]
    pub fn chat_api_key(&self) -> Option<String> {
        self.api_keys.chat.clone().or_else(|| self.api_keys.openai.clone())
    }

    /// Settings for a conversation engine built from this configuration
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        let selector = if self.speech.preferred_voices.is_empty() {
            VoiceSelector::for_language(&self.language)
        } else {
            VoiceSelector::new(self.speech.preferred_voices.clone(), &self.language)
        };

        EngineSettings {
            timing: TurnTiming {
                no_speech_restart: self.conversation.no_speech_restart,
                resume_after_speech: self.conversation.resume_after_speech,
            },
            recognition: RecognitionOptions {
                language: self.language.clone(),
            },
            speak: SpeakOptions {
                rate: self.speech.rate,
                pitch: self.speech.pitch,
                volume: self.speech.volume,
                language: self.language.clone(),
                voice_id: None,
            },
            selector,
            pinned_voice: self.speech.voice.clone(),
        }
    }
}
