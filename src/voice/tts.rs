//! Text-to-speech (TTS) processing

use std::time::Duration;

use super::{VoiceDescriptor, VoiceGender, http_client};
use crate::config::TtsProvider;
use crate::{Error, Result};

/// Default bound on one synthesis or voice listing request
pub const TTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Built-in `OpenAI` voices with the gender they present
const OPENAI_VOICES: &[(&str, VoiceGender)] = &[
    ("alloy", VoiceGender::Neutral),
    ("echo", VoiceGender::Male),
    ("fable", VoiceGender::Neutral),
    ("onyx", VoiceGender::Male),
    ("nova", VoiceGender::Female),
    ("shimmer", VoiceGender::Female),
];

#[derive(serde::Deserialize)]
struct ElevenLabsVoices {
    voices: Vec<ElevenLabsVoice>,
}

#[derive(serde::Deserialize)]
struct ElevenLabsVoice {
    voice_id: String,
    name: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl std::fmt::Debug for TextToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSpeech")
            .field("provider", &self.provider)
            .field("voice", &self.voice)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai_with_model(api_key: String, voice: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http_client(TTS_REQUEST_TIMEOUT),
            api_key,
            voice,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs_with_model(
        api_key: String,
        voice_id: String,
        model: String,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(TTS_REQUEST_TIMEOUT),
            api_key,
            voice: voice_id,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Bound each provider request by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Voice used when an utterance names none
    #[must_use]
    pub fn default_voice(&self) -> &str {
        &self.voice
    }

    /// Synthesize text to MP3 bytes
    ///
    /// `voice` overrides the configured voice; `speed` is ignored by providers
    /// without a rate control.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, voice: Option<&str>, speed: f32) -> Result<Vec<u8>> {
        let voice = voice.unwrap_or(&self.voice);
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice, speed).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
        }
    }

    /// Voices the provider offers
    ///
    /// # Errors
    ///
    /// Returns error if the provider's voice listing fails
    pub async fn list_voices(&self) -> Result<Vec<VoiceDescriptor>> {
        match self.provider {
            TtsProvider::OpenAI => Ok(OPENAI_VOICES
                .iter()
                .map(|(id, gender)| VoiceDescriptor {
                    id: (*id).to_string(),
                    name: (*id).to_string(),
                    language: "en-US".to_string(),
                    local: false,
                    gender: Some(*gender),
                })
                .collect()),
            TtsProvider::ElevenLabs => self.list_elevenlabs_voices().await,
        }
    }

    async fn synthesize_openai(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            // OpenAI accepts 0.25 to 4.0
            speed: speed.clamp(0.25, 4.0),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice, "synthesized speech");
        Ok(audio.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice, "synthesized speech");
        Ok(audio.to_vec())
    }

    async fn list_elevenlabs_voices(&self) -> Result<Vec<VoiceDescriptor>> {
        let response = self
            .client
            .get("https://api.elevenlabs.io/v1/voices")
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs voices error {status}: {body}")));
        }

        let listing: ElevenLabsVoices = response.json().await?;
        Ok(listing.voices.into_iter().map(elevenlabs_descriptor).collect())
    }
}

fn elevenlabs_descriptor(voice: ElevenLabsVoice) -> VoiceDescriptor {
    let gender = match voice.labels.get("gender").map(|g| g.to_lowercase()) {
        Some(g) if g == "female" => Some(VoiceGender::Female),
        Some(g) if g == "male" => Some(VoiceGender::Male),
        Some(_) => Some(VoiceGender::Neutral),
        None => None,
    };
    let language = match voice.labels.get("accent").map(String::as_str) {
        Some("british") => "en-GB",
        Some("australian") => "en-AU",
        _ => "en-US",
    };

    VoiceDescriptor {
        id: voice.voice_id,
        name: voice.name,
        language: language.to_string(),
        local: false,
        gender,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_openai_catalogue() {
        let tts = TextToSpeech::new_openai_with_model(
            "sk-test".to_string(),
            "nova".to_string(),
            "tts-1".to_string(),
        )
        .unwrap();

        let voices = tts.list_voices().await.unwrap();
        assert_eq!(voices.len(), 6);
        let nova = voices.iter().find(|v| v.id == "nova").unwrap();
        assert_eq!(nova.gender, Some(VoiceGender::Female));
        assert!(voices.iter().find(|v| v.id == "onyx").unwrap().is_marked_male());
    }

    #[test]
    fn test_elevenlabs_labels() {
        let voice: ElevenLabsVoice = serde_json::from_str(
            r#"{"voice_id":"abc","name":"Rachel","labels":{"gender":"female","accent":"british"}}"#,
        )
        .unwrap();
        let descriptor = elevenlabs_descriptor(voice);
        assert_eq!(descriptor.gender, Some(VoiceGender::Female));
        assert_eq!(descriptor.language, "en-GB");

        let voice: ElevenLabsVoice =
            serde_json::from_str(r#"{"voice_id":"def","name":"Plain"}"#).unwrap();
        assert_eq!(elevenlabs_descriptor(voice).gender, None);
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(
            TextToSpeech::new_elevenlabs_with_model(
                String::new(),
                "voice".to_string(),
                "eleven_monolingual_v1".to_string()
            )
            .is_err()
        );
    }
}
