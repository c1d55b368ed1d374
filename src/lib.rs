//! voiceloop - Real-time voice conversations with an AI assistant
//!
//! The library drives turn-based spoken exchanges:
//! - Speech recognition and synthesis adapters over two backends
//! - Text normalization for speech and default voice selection
//! - A conversation engine that cycles listen, think and speak
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConversationEngine                  │
//! │   state machine  │  timers  │  voice catalogue      │
//! └──────┬──────────────────┬──────────────────┬────────┘
//!        │                  │                  │
//! ┌──────▼──────┐   ┌───────▼───────┐  ┌───────▼───────┐
//! │ Recognizer  │   │ ReplyGenerator│  │  Synthesizer  │
//! │ hosted/dev. │   │  chat API     │  │  hosted/dev.  │
//! └─────────────┘   └───────────────┘  └───────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod voice;

pub use agent::{ChatService, Reply, ReplyGenerator};
pub use config::Config;
pub use conversation::{
    ConversationCallbacks, ConversationEngine, ConversationEvent, EngineSettings, Phase,
};
pub use error::{Error, Result};
pub use voice::{
    Backend, RecognitionEvent, Recognizer, SpeakOptions, SpeakOutcome, SpeechStack, Synthesizer,
    VoiceDescriptor, normalize,
};
