//! Reply generation
//!
//! The conversation engine hands each final transcript to a
//! [`ReplyGenerator`] and speaks whatever comes back.

mod chat;

use async_trait::async_trait;

pub use chat::{ChatMessage, ChatService};

use crate::Result;

/// Assistant reply for one user turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
}

impl Reply {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Produces assistant replies for user utterances
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply to `text` within conversation `session_id`
    ///
    /// # Errors
    ///
    /// Returns error if the upstream service fails
    async fn generate_reply(&self, text: &str, session_id: &str) -> Result<Reply>;
}
