//! Turn-based voice conversation
//!
//! Listen, transcribe, ask the reply generator, speak the reply and listen
//! again, until stopped or a fatal recognition error occurs.

mod callbacks;
mod engine;
mod machine;

pub use callbacks::{ConversationCallbacks, ConversationEvent, dispatch};
pub use engine::{ConversationEngine, EngineSettings};
pub use machine::{ConversationMachine, Effect, Input, Phase, TurnTiming};
