//! Error types for voiceloop

use thiserror::Error;

/// Result type alias for voiceloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice conversation engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A capability was never granted (checked before starting)
    #[error("permission required: {0}")]
    PermissionRequired(String),

    /// The platform refused a capability at runtime
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text provider error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech provider error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Reply generator error
    #[error("reply error: {0}")]
    Reply(String),

    /// Host bridge error (link closed, malformed message)
    #[error("host bridge error: {0}")]
    Bridge(String),

    /// Conversation lifecycle error
    #[error("conversation error: {0}")]
    Conversation(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
